//! Splits large instrument-id requests into balanced sub-requests fired
//! across a dedicated timeseries thread lane, and runs symbology lookups on
//! a separate lane so a stalled timeseries request can never starve
//! symbology resolution or vice versa.
//!
//! Grounded on the original `GetterAsynchronous`: two `VariadicThreadPool`s
//! (`m_symbologyPool`, `m_timeseriesPool`), and its `splitVector`/`joinLists`
//! template helpers, reproduced here exactly (`n = size / nSplit; segment =
//! size / (n + 1)`, `n` segments of `segment` length followed by one
//! remainder segment) rather than a simpler `ceil`-based chunking, so the
//! chunk-count and chunk-size behavior matches the original bit for bit.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::chain::error::ChainError;
use crate::chain::pool::{DelayedRetry, TaskPool};
use crate::chain::provider::{CbboMsg, QuoteProvider, Schema, SymbologyResolution};
use crate::chain::types::{TimeRange, Timestamp};

/// Splits `to_split` into balanced chunks of at most `n_split` elements
/// each, following the original's segment-count formula rather than a plain
/// `ceil(len / n_split)` chunking. For `to_split.len() <= n_split` this is a
/// single chunk containing every element.
pub fn split_ids<T: Clone>(to_split: &[T], n_split: usize) -> Vec<Vec<T>> {
    if to_split.len() <= n_split {
        return vec![to_split.to_vec()];
    }
    let n = to_split.len() / n_split;
    let segment = to_split.len() / (n + 1);
    let mut chunks = Vec::with_capacity(n + 1);
    for i in 0..n {
        chunks.push(to_split[i * segment..(i + 1) * segment].to_vec());
    }
    chunks.push(to_split[n * segment..].to_vec());
    chunks
}

/// Concatenates sub-request results in submission order.
pub fn join_lists<T>(to_join: Vec<Vec<T>>) -> Vec<T> {
    to_join.into_iter().flatten().collect()
}

/// Fronts a [`QuoteProvider`] with two dedicated worker lanes and automatic
/// request splitting for instrument lists larger than `split_threshold`.
pub struct RateLimitedProvider {
    inner: Arc<dyn QuoteProvider>,
    symbology_pool: TaskPool,
    timeseries_pool: TaskPool,
    split_threshold: usize,
    n_retries: u64,
}

impl RateLimitedProvider {
    pub fn new(
        inner: Arc<dyn QuoteProvider>,
        n_symbology_threads: usize,
        n_timeseries_threads: usize,
        split_threshold: usize,
        n_retries: u64,
    ) -> Self {
        Self {
            inner,
            symbology_pool: TaskPool::new(n_symbology_threads),
            timeseries_pool: TaskPool::new(n_timeseries_threads),
            split_threshold,
            n_retries,
        }
    }

    pub fn resolve_symbology(
        &self,
        dataset: &str,
        underlier: &str,
        valuation_date: NaiveDate,
    ) -> Result<SymbologyResolution, ChainError> {
        let provider = Arc::clone(&self.inner);
        let dataset = dataset.to_string();
        let underlier = underlier.to_string();
        let n_retries = self.n_retries;
        let delayed = DelayedRetry::new(n_retries, move || {
            let provider = Arc::clone(&provider);
            let dataset = dataset.clone();
            let underlier = underlier.clone();
            self.symbology_pool
                .submit(move || provider.resolve_symbology(&dataset, &underlier, valuation_date))
        });
        delayed.retrieve(|attempt, error| {
            tracing::warn!(attempt, %error, underlier, "retrying symbology resolution");
        })
    }

    /// Splits `ids` into balanced sub-requests, fires every sub-request onto
    /// the timeseries lane immediately, then blocks for each in submission
    /// order and splices the results back together.
    pub fn get_cbbo_range(
        &self,
        ids: &[String],
        dataset: &str,
        schema: Schema,
        at: Timestamp,
        window: TimeRange,
    ) -> Result<Vec<CbboMsg>, ChainError> {
        let chunks = split_ids(ids, self.split_threshold);
        let n_retries = self.n_retries;

        let delayed_retries: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let provider = Arc::clone(&self.inner);
                let dataset = dataset.to_string();
                DelayedRetry::new(n_retries, move || {
                    let provider = Arc::clone(&provider);
                    let dataset = dataset.clone();
                    let chunk = chunk.clone();
                    self.timeseries_pool
                        .submit(move || provider.get_cbbo_range(&chunk, &dataset, schema, at, window))
                })
            })
            .collect();

        let mut parts = Vec::with_capacity(delayed_retries.len());
        for delayed in delayed_retries {
            let part = delayed.retrieve(|attempt, error| {
                tracing::warn!(attempt, %error, "retrying cbbo range request");
            })?;
            parts.push(part);
        }
        Ok(join_lists(parts))
    }
}

impl QuoteProvider for RateLimitedProvider {
    fn resolve_symbology(
        &self,
        dataset: &str,
        underlier: &str,
        valuation_date: NaiveDate,
    ) -> Result<SymbologyResolution, ChainError> {
        RateLimitedProvider::resolve_symbology(self, dataset, underlier, valuation_date)
    }

    fn get_cbbo_range(
        &self,
        ids: &[String],
        dataset: &str,
        schema: Schema,
        at: Timestamp,
        window: TimeRange,
    ) -> Result<Vec<CbboMsg>, ChainError> {
        RateLimitedProvider::get_cbbo_range(self, ids, dataset, schema, at, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_below_threshold_is_a_single_chunk() {
        let ids: Vec<u32> = (0..50).collect();
        let chunks = split_ids(&ids, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 50);
    }

    #[test]
    fn split_333_ids_at_threshold_100_yields_four_chunks() {
        let ids: Vec<u32> = (0..333).collect();
        let chunks = split_ids(&ids, 100);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 83);
        assert_eq!(chunks[1].len(), 83);
        assert_eq!(chunks[2].len(), 83);
        assert_eq!(chunks[3].len(), 84);
    }

    #[test]
    fn split_then_join_preserves_order_and_contents() {
        let ids: Vec<u32> = (0..333).collect();
        let chunks = split_ids(&ids, 100);
        let joined = join_lists(chunks);
        assert_eq!(joined, ids);
    }
}
