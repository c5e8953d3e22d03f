//! Wraps a [`QuoteProvider`] to get a complete-as-possible picture of a
//! chain's quote activity around a reference time.
//!
//! Grounded on `RequesterSynchronous::Internal::getPutCallRecordMap`: a
//! one-second pass over the full instrument set followed by a one-minute
//! pass over whatever is left missing (the original comments out resetting
//! the missing set before the second pass, so the residual genuinely
//! carries forward), each pass running a while-loop that shrinks its
//! lookback window one balanced sub-request at a time and halves its
//! per-request record budget — restarting the whole pass at the *original*
//! window but with the *already-shrunk* missing set — on decoder overflow.

use std::collections::HashMap;

use crate::chain::error::ChainError;
use crate::chain::provider::{CbboMsg, QuoteProvider, Schema};
use crate::chain::snapshot::builder::SnapshotBuilder;
use crate::chain::symbology::model::InstrumentId;
use crate::chain::symbology::osi::OsiIdentifier;
use crate::chain::types::{TimeRange, Timestamp};

/// Tunables controlling the planner's request sizing and overflow recovery.
#[derive(Debug, Clone, Copy)]
pub struct PlannerBudget {
    pub n_max_records: u64,
    pub buffer_overflow_retries: u32,
    pub split_threshold: usize,
}

/// Drives a [`QuoteProvider`] through the two-schema retrieval algorithm.
pub struct RequestPlanner<'a> {
    provider: &'a dyn QuoteProvider,
    dataset: String,
}

impl<'a> RequestPlanner<'a> {
    pub fn new(provider: &'a dyn QuoteProvider, dataset: impl Into<String>) -> Self {
        Self {
            provider,
            dataset: dataset.into(),
        }
    }

    /// Fetches every CBBO tick obtainable for `ids` around `at`: a
    /// one-second pass over `window_one_second`, then a one-minute pass over
    /// `window_one_minute` seeded with whatever the first pass left missing.
    pub fn fetch_chain(
        &self,
        id_to_osi: &HashMap<InstrumentId, OsiIdentifier>,
        at: Timestamp,
        window_one_second: TimeRange,
        window_one_minute: TimeRange,
        budget: PlannerBudget,
    ) -> Result<Vec<CbboMsg>, ChainError> {
        let mut missing: Vec<InstrumentId> = id_to_osi.keys().cloned().collect();

        let mut all_msgs = self.run_schema_pass(&mut missing, id_to_osi, at, window_one_second, Schema::OneSecond, budget)?;
        tracing::info!(missing = missing.len(), "one-second pass complete");

        let one_minute = self.run_schema_pass(&mut missing, id_to_osi, at, window_one_minute, Schema::OneMinute, budget)?;
        tracing::info!(missing = missing.len(), "one-minute pass complete");
        all_msgs.extend(one_minute);

        Ok(all_msgs)
    }

    /// Runs one schema's retrieval, halving `budget.n_max_records` and
    /// restarting the whole window on decoder overflow, up to
    /// `budget.buffer_overflow_retries` times. `missing` is mutated in place
    /// and is not reset between retries: only the window restarts from
    /// `window`, the progress already made in trimming `missing` survives.
    fn run_schema_pass(
        &self,
        missing: &mut Vec<InstrumentId>,
        id_to_osi: &HashMap<InstrumentId, OsiIdentifier>,
        at: Timestamp,
        window: TimeRange,
        schema: Schema,
        budget: PlannerBudget,
    ) -> Result<Vec<CbboMsg>, ChainError> {
        let mut n_max_records = budget.n_max_records;
        let mut retries_used = 0u32;
        loop {
            match self.run_window(missing, id_to_osi, at, window, schema, n_max_records, budget.split_threshold) {
                Ok(msgs) => return Ok(msgs),
                Err(ChainError::DecoderOverflow(detail)) if retries_used < budget.buffer_overflow_retries => {
                    retries_used += 1;
                    n_max_records = (n_max_records / 2).max(1);
                    tracing::warn!(
                        retries_used,
                        n_max_records,
                        detail,
                        "decoder overflow, halving record budget and restarting schema pass"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt at exhausting `window` for `schema`, splitting it into
    /// successively smaller sub-windows as `missing` shrinks.
    fn run_window(
        &self,
        missing: &mut Vec<InstrumentId>,
        id_to_osi: &HashMap<InstrumentId, OsiIdentifier>,
        mut at: Timestamp,
        mut window: TimeRange,
        schema: Schema,
        n_max_records: u64,
        split_threshold: usize,
    ) -> Result<Vec<CbboMsg>, ChainError> {
        let mut collected = Vec::new();
        while !missing.is_empty() && !window.is_zero() {
            let divisor = split_threshold.min(missing.len()).max(1) as u64;
            let max_per_instrument = (n_max_records / divisor).max(1);
            let expected_per_instrument = (window.as_micros() / schema.unit().as_micros().max(1)).max(0) as u64;
            let n_split = expected_per_instrument / max_per_instrument + 1;
            let sub_window = window / (n_split as i64).max(1);

            let msgs = self.provider.get_cbbo_range(missing, &self.dataset, schema, at, sub_window)?;

            let sub_id_to_osi: HashMap<InstrumentId, OsiIdentifier> = missing
                .iter()
                .filter_map(|id| id_to_osi.get(id).map(|osi| (id.clone(), osi.clone())))
                .collect();
            let known_ids = sub_id_to_osi.keys().cloned().collect();
            let cbbo_map = SnapshotBuilder::map_into_instrument_lists(msgs.clone(), &known_ids);
            *missing = SnapshotBuilder::find_missing(&cbbo_map, &sub_id_to_osi);

            collected.extend(msgs);
            window = window - sub_window;
            at = at.saturating_sub(sub_window);
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::SymbologyResolution;
    use crate::chain::symbology::osi::{OptionType, StrikeKey};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedProvider {
        calls: AtomicU32,
        overflow_until_call: u32,
        responses: Mutex<Vec<Vec<CbboMsg>>>,
    }

    impl QuoteProvider for ScriptedProvider {
        fn resolve_symbology(
            &self,
            _dataset: &str,
            _underlier: &str,
            _valuation_date: NaiveDate,
        ) -> Result<SymbologyResolution, ChainError> {
            Ok(Vec::new())
        }

        fn get_cbbo_range(
            &self,
            _ids: &[String],
            _dataset: &str,
            _schema: Schema,
            _at: Timestamp,
            _window: TimeRange,
        ) -> Result<Vec<CbboMsg>, ChainError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.overflow_until_call {
                return Err(ChainError::DecoderOverflow("buffer full".to_string()));
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn osi_map() -> HashMap<InstrumentId, OsiIdentifier> {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let mut map = HashMap::new();
        map.insert(
            "INSTR-1".to_string(),
            OsiIdentifier::new("SPY", expiry, OptionType::Call, StrikeKey::from_price(450.0)),
        );
        map
    }

    #[test]
    fn halves_budget_and_retries_on_decoder_overflow() {
        let provider = ScriptedProvider {
            calls: AtomicU32::new(0),
            overflow_until_call: 2,
            responses: Mutex::new(vec![Vec::new()]),
        };
        let planner = RequestPlanner::new(&provider, "opra-pillar");
        let result = planner.fetch_chain(
            &osi_map(),
            Timestamp::from_nanos(0),
            TimeRange::from_micros_unchecked(1_000_000),
            TimeRange::zero(),
            PlannerBudget {
                n_max_records: 1600,
                buffer_overflow_retries: 3,
                split_threshold: 100,
            },
        );
        assert!(result.is_ok());
        assert!(provider.calls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn propagates_decoder_overflow_once_retries_exhausted() {
        let provider = ScriptedProvider {
            calls: AtomicU32::new(0),
            overflow_until_call: 100,
            responses: Mutex::new(Vec::new()),
        };
        let planner = RequestPlanner::new(&provider, "opra-pillar");
        let result = planner.fetch_chain(
            &osi_map(),
            Timestamp::from_nanos(0),
            TimeRange::from_micros_unchecked(1_000_000),
            TimeRange::zero(),
            PlannerBudget {
                n_max_records: 1600,
                buffer_overflow_retries: 2,
                split_threshold: 100,
            },
        );
        assert!(matches!(result, Err(ChainError::DecoderOverflow(_))));
    }
}
