//! Reduces a flat list of CBBO ticks into the put/call record maps an
//! [`crate::chain::model::OptionChain`] is built from.
//!
//! Grounded on `OptionChain::buildRecordTimeline` /
//! `mapLatestBestInTimelineToRecord` / `findInstrumentsMissingCbboMsgs`: ticks
//! are first grouped per instrument, then folded into two-second time slots
//! (a slot keeps the "better" of two candidate records at the same strike —
//! prefer a fully quoted bid/ask over a one-sided one, and within the same
//! tier prefer the strictly newer tick), and finally the slots are collapsed
//! oldest-to-newest so the freshest available record wins per strike.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::chain::model::OptionChain;
use crate::chain::provider::CbboMsg;
use crate::chain::snapshot::record::{PriceWeight, Record};
use crate::chain::symbology::model::{InstrumentId, InstrumentTable};
use crate::chain::symbology::osi::{OptionType, OsiIdentifier, StrikeKey};
use crate::chain::types::{TimeRange, Timestamp};

/// The time-slot width ticks are bucketed into before the "better record"
/// replacement rule is applied, matching the original's hardcoded
/// `std::chrono::seconds(2)`.
pub fn slot_window() -> TimeRange {
    TimeRange::from_micros_unchecked(2_000_000)
}

/// Per-instrument CBBO ticks, grouped from a single flat provider response.
pub type CbboByInstrument = HashMap<InstrumentId, Vec<CbboMsg>>;

/// Stateless namespace for the snapshot reduction steps; kept as a unit
/// struct so the pipeline stages read as a sequence of named operations,
/// matching the teacher's preference for small free-standing functions
/// grouped under a common module path.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Groups a flat tick list by instrument id, dropping any tick for an
    /// instrument absent from `known_ids` (an id the symbology resolution
    /// never produced, which should not happen but is defensively ignored
    /// rather than failing the whole response).
    pub fn map_into_instrument_lists(msgs: Vec<CbboMsg>, known_ids: &HashSet<InstrumentId>) -> CbboByInstrument {
        let mut grouped: CbboByInstrument = HashMap::new();
        for msg in msgs {
            if known_ids.contains(&msg.instrument_id) {
                grouped.entry(msg.instrument_id.clone()).or_default().push(msg);
            }
        }
        grouped
    }

    fn to_record(msg: &CbboMsg) -> Record {
        Record {
            trade: PriceWeight::new(msg.trade_price, msg.trade_size as u64),
            trade_time: msg.ts_event,
            bid: PriceWeight::new(msg.bid_price, msg.bid_size as u64),
            ask: PriceWeight::new(msg.ask_price, msg.ask_size as u64),
            recv_time: msg.ts_recv,
            comment: String::new(),
        }
    }

    fn slot_time(ts: Timestamp, slot_window: TimeRange) -> Timestamp {
        let window_nanos = slot_window.as_nanos();
        Timestamp::from_nanos((ts.as_nanos() / window_nanos) * window_nanos)
    }

    /// Keeps `candidate` over the record already at `strike` only if it's
    /// strictly more complete (bid/ask valid beats any-bid/ask beats
    /// nothing), or equally complete but strictly newer.
    fn insert_better(map: &mut BTreeMap<StrikeKey, Record>, strike: StrikeKey, candidate: Record) {
        match map.get_mut(&strike) {
            None => {
                map.insert(strike, candidate);
            }
            Some(prev) => {
                let better = (candidate.bid_ask_valid() && (!prev.bid_ask_valid() || candidate.recv_time > prev.recv_time))
                    || (candidate.any_bid_ask_valid() && (!prev.any_bid_ask_valid() || candidate.recv_time > prev.recv_time));
                if better {
                    *prev = candidate;
                }
            }
        }
    }

    /// Buckets every tick into its two-second slot, keyed by strike and put
    /// or call, applying the better-record rule within each slot.
    pub fn build_timeline(
        cbbo_map: &CbboByInstrument,
        id_to_osi: &HashMap<InstrumentId, OsiIdentifier>,
        slot_window: TimeRange,
    ) -> BTreeMap<Timestamp, (BTreeMap<StrikeKey, Record>, BTreeMap<StrikeKey, Record>)> {
        let mut timeline: BTreeMap<Timestamp, (BTreeMap<StrikeKey, Record>, BTreeMap<StrikeKey, Record>)> = BTreeMap::new();
        for (instrument_id, msgs) in cbbo_map {
            let Some(osi) = id_to_osi.get(instrument_id) else {
                tracing::error!(instrument_id, "missing OSI mapping while building record timeline");
                continue;
            };
            for msg in msgs {
                let record = Self::to_record(msg);
                if !record.any_bid_ask_valid() {
                    continue;
                }
                let slot = Self::slot_time(record.recv_time, slot_window);
                let entry = timeline.entry(slot).or_default();
                let side = match osi.option_type() {
                    OptionType::Put => &mut entry.0,
                    OptionType::Call => &mut entry.1,
                };
                Self::insert_better(side, osi.strike(), record);
            }
        }
        timeline
    }

    /// Folds a timeline oldest-to-newest into final strike-to-record maps,
    /// so a later, more complete slot overwrites an earlier placeholder.
    pub fn collapse_timeline(
        timeline: BTreeMap<Timestamp, (BTreeMap<StrikeKey, Record>, BTreeMap<StrikeKey, Record>)>,
    ) -> (BTreeMap<StrikeKey, Record>, BTreeMap<StrikeKey, Record>) {
        let mut puts = BTreeMap::new();
        let mut calls = BTreeMap::new();
        for (_, (slot_puts, slot_calls)) in timeline {
            for (strike, record) in slot_puts {
                Self::insert_better(&mut puts, strike, record);
            }
            for (strike, record) in slot_calls {
                Self::insert_better(&mut calls, strike, record);
            }
        }
        (puts, calls)
    }

    /// Strict per-instrument data-quality check used by the request planner
    /// to decide whether a schema pass needs to retry an instrument: an
    /// instrument only counts as present if at least one tick has both a
    /// nonzero bid size and a nonzero ask size, not merely some message.
    pub fn find_missing(cbbo_map: &CbboByInstrument, id_to_osi: &HashMap<InstrumentId, OsiIdentifier>) -> Vec<InstrumentId> {
        let mut missing = Vec::new();
        for instrument_id in id_to_osi.keys() {
            let has_valid_top_of_book = cbbo_map
                .get(instrument_id)
                .map(|msgs| msgs.iter().any(|msg| msg.ask_size > 0 && msg.bid_size > 0))
                .unwrap_or(false);
            if !has_valid_top_of_book {
                missing.push(instrument_id.clone());
            }
        }
        missing
    }

    /// Runs the full reduction: group, timeline, collapse, and assemble into
    /// an [`OptionChain`] against `instrument_table`.
    pub fn build(
        msgs: Vec<CbboMsg>,
        instrument_table: &InstrumentTable,
        valuation_date: NaiveDate,
    ) -> OptionChain {
        let id_to_osi: HashMap<InstrumentId, OsiIdentifier> = instrument_table
            .puts
            .values()
            .chain(instrument_table.calls.values())
            .map(|(osi, id)| (id.clone(), osi.clone()))
            .collect();
        let known_ids: HashSet<InstrumentId> = id_to_osi.keys().cloned().collect();

        let cbbo_map = Self::map_into_instrument_lists(msgs, &known_ids);
        let timeline = Self::build_timeline(&cbbo_map, &id_to_osi, slot_window());
        let (puts, calls) = Self::collapse_timeline(timeline);
        OptionChain::build(puts, calls, instrument_table, valuation_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::symbology::osi::StrikeKey;

    fn msg(id: &str, recv_nanos: i64, bid: f64, bid_sz: u32, ask: f64, ask_sz: u32) -> CbboMsg {
        CbboMsg {
            instrument_id: id.to_string(),
            ts_event: Timestamp::from_nanos(recv_nanos),
            ts_recv: Timestamp::from_nanos(recv_nanos),
            trade_price: f64::NAN,
            trade_size: 0,
            bid_price: bid,
            bid_size: bid_sz,
            ask_price: ask,
            ask_size: ask_sz,
        }
    }

    fn table() -> InstrumentTable {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let mut table = InstrumentTable {
            underlier: "SPY".to_string(),
            expiry_date: expiry,
            puts: HashMap::new(),
            calls: HashMap::new(),
        };
        let strike = StrikeKey::from_price(450.0);
        table.puts.insert(
            strike,
            (OsiIdentifier::new("SPY", expiry, OptionType::Put, strike), "PUT-1".to_string()),
        );
        table.calls.insert(
            strike,
            (OsiIdentifier::new("SPY", expiry, OptionType::Call, strike), "CALL-1".to_string()),
        );
        table
    }

    #[test]
    fn later_more_complete_tick_wins_within_a_slot() {
        let table = table();
        let msgs = vec![
            msg("CALL-1", 1_000_000_000, 0.0, 0, 10.0, 5),
            msg("CALL-1", 1_500_000_000, 9.8, 5, 10.0, 5),
        ];
        let chain = SnapshotBuilder::build(msgs, &table, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let record = &chain.calls[&StrikeKey::from_price(450.0)];
        assert!(record.bid_ask_valid());
        assert_eq!(record.bid.price, 9.8);
    }

    #[test]
    fn zero_weight_ticks_are_ignored() {
        let table = table();
        let msgs = vec![msg("CALL-1", 1_000_000_000, 0.0, 0, 0.0, 0)];
        let chain = SnapshotBuilder::build(msgs, &table, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(chain.calls[&StrikeKey::from_price(450.0)].is_empty());
    }

    #[test]
    fn find_missing_requires_both_sides_nonzero_on_some_tick() {
        let table = table();
        let id_to_osi: HashMap<InstrumentId, OsiIdentifier> = table
            .puts
            .values()
            .chain(table.calls.values())
            .map(|(osi, id)| (id.clone(), osi.clone()))
            .collect();
        let cbbo_map = SnapshotBuilder::map_into_instrument_lists(
            vec![msg("CALL-1", 1_000_000_000, 9.8, 0, 10.0, 5)],
            &id_to_osi.keys().cloned().collect(),
        );
        let missing = SnapshotBuilder::find_missing(&cbbo_map, &id_to_osi);
        assert_eq!(missing.len(), 2);
        assert!(missing.contains(&"PUT-1".to_string()));
        assert!(missing.contains(&"CALL-1".to_string()));
    }
}
