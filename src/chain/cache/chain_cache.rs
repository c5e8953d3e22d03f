//! Per-symbol chain store and nearest-key lookup.
//!
//! Grounded on `RetrieverInMemory` and `MarketEnvironmentExtended`'s static
//! `getNextInTimeRange`: chains are indexed `symbol -> expiry -> (chain_time
//! -> chain)`, a single mutex guards every accessor (the original's note
//! that read-heavy workloads are fine because critical sections are short),
//! and a lookup compares the first stored key at-or-after the requested
//! instant against its immediate predecessor, keeping whichever is closer —
//! falling back to the last stored key if the requested instant is past
//! every entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::chain::error::ChainError;
use crate::chain::gapfill::GapFiller;
use crate::chain::market_environment::MarketEnvironment;
use crate::chain::model::OptionChain;
use crate::chain::types::{TimeRange, Timestamp};

type TimeToChain = BTreeMap<Timestamp, OptionChain>;
type ExpiryToTime = HashMap<NaiveDate, TimeToChain>;

struct Inner {
    chains: HashMap<String, ExpiryToTime>,
    environments: HashMap<String, Arc<dyn MarketEnvironment>>,
}

/// Picks the stored key nearest `at`, and whether that distance is strictly
/// inside `tolerance`. Distances are computed from raw nanoseconds rather
/// than `Timestamp`'s `Sub` impl, which does not clamp to non-negative.
fn nearest_in_range(map: &TimeToChain, at: Timestamp, tolerance: TimeRange) -> Option<(Timestamp, bool)> {
    let lower_bound = map.range(at..).next().map(|(&k, _)| k);
    let predecessor = map.range(..at).next_back().map(|(&k, _)| k);

    let candidate = match (predecessor, lower_bound) {
        (Some(prev), Some(next)) => {
            let d_prev = (prev.as_nanos() - at.as_nanos()).abs();
            let d_next = (next.as_nanos() - at.as_nanos()).abs();
            if d_prev < d_next { prev } else { next }
        }
        (None, Some(next)) => next,
        (Some(prev), None) => prev,
        (None, None) => return None,
    };

    let distance = (candidate.as_nanos() - at.as_nanos()).abs();
    Some((candidate, distance < tolerance.as_nanos()))
}

/// Holds built chains for every symbol submitted this batch, plus the
/// single `MarketEnvironment` registered per symbol.
pub struct ChainCache {
    inner: Mutex<Inner>,
}

impl ChainCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                chains: HashMap::new(),
                environments: HashMap::new(),
            }),
        }
    }

    /// Registers the `MarketEnvironment` used to discount and gap-fill
    /// `symbol`'s chains. Last submission wins.
    pub fn register_environment(&self, symbol: &str, environment: Arc<dyn MarketEnvironment>) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.environments.insert(symbol.to_string(), environment);
    }

    /// Indexes `chain` under `(underlier, expiry_date, chain_time)`.
    pub fn submit(&self, chain: OptionChain) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let chain_time = chain.cache_key_time();
        inner
            .chains
            .entry(chain.underlier.clone())
            .or_default()
            .entry(chain.expiry_date)
            .or_default()
            .insert(chain_time, chain);
    }

    /// Fetches the raw chain nearest `at` for `(symbol, expiry)`, failing if
    /// none is stored or the nearest one falls outside `tolerance`.
    pub fn get_raw(&self, symbol: &str, at: Timestamp, expiry: NaiveDate, tolerance: TimeRange) -> Result<OptionChain, ChainError> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let time_map = inner.chains.get(symbol).and_then(|expiries| expiries.get(&expiry)).ok_or_else(|| {
            ChainError::NotFound(format!("no cached chain for {symbol} expiring {expiry}"))
        })?;

        let (key, in_range) = nearest_in_range(time_map, at, tolerance)
            .ok_or_else(|| ChainError::NotFound(format!("no cached chain for {symbol} expiring {expiry}")))?;
        if !in_range {
            return Err(ChainError::NotFound(format!(
                "nearest cached chain for {symbol} expiring {expiry} at {key} is outside tolerance of {at}"
            )));
        }
        time_map
            .get(&key)
            .cloned()
            .ok_or_else(|| ChainError::Internal(format!("chain cache corrupted: key {key} has no stored chain")))
    }

    /// Fetches the raw chain nearest `at` and gap-fills it using the
    /// `MarketEnvironment` registered for `symbol`.
    pub fn get_enhanced(&self, symbol: &str, at: Timestamp, expiry: NaiveDate, tolerance: TimeRange) -> Result<OptionChain, ChainError> {
        let raw = self.get_raw(symbol, at, expiry, tolerance)?;
        let environment = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner
                .environments
                .get(symbol)
                .cloned()
                .ok_or_else(|| ChainError::NotFound(format!("no MarketEnvironment registered for {symbol}")))?
        };
        let result = GapFiller::fill_gaps(&raw, environment.as_ref());
        Ok(result.chain)
    }
}

impl Default for ChainCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::market_environment::{ExchangeClose, FlatRateEnvironment};
    use crate::chain::symbology::model::InstrumentTable;

    fn empty_chain(underlier: &str, expiry: NaiveDate, chain_time_nanos: i64) -> OptionChain {
        let table = InstrumentTable {
            underlier: underlier.to_string(),
            expiry_date: expiry,
            puts: HashMap::new(),
            calls: HashMap::new(),
        };
        let mut chain = OptionChain::build(BTreeMap::new(), BTreeMap::new(), &table, expiry);
        // chain_time derives from recv_time of non-empty records, which this
        // chain has none of; stash a synthetic record so cache_key_time is
        // deterministic for the test.
        let strike = crate::chain::symbology::osi::StrikeKey::from_price(100.0);
        chain.calls.insert(
            strike,
            crate::chain::snapshot::record::Record {
                trade: crate::chain::snapshot::record::PriceWeight::absent(),
                trade_time: Timestamp::from_nanos(chain_time_nanos),
                bid: crate::chain::snapshot::record::PriceWeight::new(1.0, 1),
                ask: crate::chain::snapshot::record::PriceWeight::new(1.1, 1),
                recv_time: Timestamp::from_nanos(chain_time_nanos),
                comment: String::new(),
            },
        );
        chain
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    #[test]
    fn get_raw_returns_nearest_key_within_tolerance() {
        let cache = ChainCache::new();
        cache.submit(empty_chain("SPY", expiry(), 1_000_000_000));
        cache.submit(empty_chain("SPY", expiry(), 5_000_000_000));

        let tolerance = TimeRange::from_micros_unchecked(2_000_000);
        let found = cache
            .get_raw("SPY", Timestamp::from_nanos(1_500_000_000), expiry(), tolerance)
            .unwrap();
        assert_eq!(found.chain_time(), Timestamp::from_nanos(1_000_000_000));
    }

    #[test]
    fn get_raw_falls_back_to_last_key_past_every_entry() {
        let cache = ChainCache::new();
        cache.submit(empty_chain("SPY", expiry(), 1_000_000_000));
        cache.submit(empty_chain("SPY", expiry(), 5_000_000_000));

        let tolerance = TimeRange::from_micros_unchecked(10_000_000_000);
        let found = cache
            .get_raw("SPY", Timestamp::from_nanos(50_000_000_000), expiry(), tolerance)
            .unwrap();
        assert_eq!(found.chain_time(), Timestamp::from_nanos(5_000_000_000));
    }

    #[test]
    fn get_raw_reports_not_found_outside_tolerance() {
        let cache = ChainCache::new();
        cache.submit(empty_chain("SPY", expiry(), 1_000_000_000));

        let tolerance = TimeRange::from_micros_unchecked(1);
        let result = cache.get_raw("SPY", Timestamp::from_nanos(50_000_000_000), expiry(), tolerance);
        assert!(result.is_err());
    }

    #[test]
    fn get_enhanced_runs_gap_filler_with_registered_environment() {
        let cache = ChainCache::new();
        cache.submit(empty_chain("SPY", expiry(), 1_000_000_000));
        cache.register_environment(
            "SPY",
            Arc::new(FlatRateEnvironment::new(
                0.05,
                ExchangeClose {
                    hour: 16,
                    minute: 0,
                    timezone: chrono_tz::America::New_York,
                },
            )),
        );

        let tolerance = TimeRange::from_micros_unchecked(2_000_000);
        let enhanced = cache
            .get_enhanced("SPY", Timestamp::from_nanos(1_000_000_000), expiry(), tolerance)
            .unwrap();
        assert_eq!(enhanced.underlier, "SPY");
    }

    #[test]
    fn get_enhanced_fails_without_a_registered_environment() {
        let cache = ChainCache::new();
        cache.submit(empty_chain("SPY", expiry(), 1_000_000_000));
        let tolerance = TimeRange::from_micros_unchecked(2_000_000);
        let result = cache.get_enhanced("SPY", Timestamp::from_nanos(1_000_000_000), expiry(), tolerance);
        assert!(result.is_err());
    }
}
