//! The assembled option chain and the utility calculations that both the
//! gap filler and the cache consult: validity, chain/expiry timing,
//! discounting, and put-call parity.
//!
//! Grounded on the original `OptionChain` and its nested `Util`: records are
//! kept in strike-sorted maps (here `BTreeMap<StrikeKey, Record>`, mirroring
//! the original's `std::map<std::string, Record>` ordered lexicographically
//! — which, for the fixed-width zero-padded strike key, is also numeric
//! order) because `parity_rate` and the gap filler both walk strikes in
//! order.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{NaiveDate, TimeZone};

use crate::chain::error::ChainError;
use crate::chain::market_environment::ExchangeClose;
use crate::chain::snapshot::record::Record;
use crate::chain::symbology::model::{InstrumentId, InstrumentTable};
use crate::chain::symbology::osi::{OptionType, StrikeKey};
use crate::chain::types::{TimeRange, Timestamp};

/// Seconds in a Julian year, the divisor the original uses for year
/// fractions in discounting (365.25 days, leap-year aware on average).
const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

/// Strike-indexed puts and calls for one underlier/expiry, plus the set of
/// instruments known from symbology but never observed.
#[derive(Debug, Clone)]
pub struct OptionChain {
    pub underlier: String,
    pub valuation_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub puts: BTreeMap<StrikeKey, Record>,
    pub calls: BTreeMap<StrikeKey, Record>,
    pub missing_instruments: HashMap<InstrumentId, crate::chain::symbology::osi::OsiIdentifier>,
}

impl OptionChain {
    /// Builds a chain from a collapsed put/call record map and the
    /// instrument table it was resolved from: strikes in the table with no
    /// observed record become empty placeholders, and instruments for which
    /// still no record exists anywhere populate `missing_instruments`.
    pub fn build(
        puts: BTreeMap<StrikeKey, Record>,
        calls: BTreeMap<StrikeKey, Record>,
        instrument_table: &InstrumentTable,
        valuation_date: NaiveDate,
    ) -> Self {
        let mut chain = Self {
            underlier: instrument_table.underlier.clone(),
            valuation_date,
            expiry_date: instrument_table.expiry_date,
            puts,
            calls,
            missing_instruments: HashMap::new(),
        };

        let mut id_to_osi: HashMap<InstrumentId, crate::chain::symbology::osi::OsiIdentifier> = HashMap::new();
        for (osi, id) in instrument_table.puts.values().chain(instrument_table.calls.values()) {
            id_to_osi.insert(id.clone(), osi.clone());
        }

        let clear_filled = |id_to_osi: &mut HashMap<InstrumentId, crate::chain::symbology::osi::OsiIdentifier>,
                            strike_to_instrument: &HashMap<StrikeKey, InstrumentId>,
                            records: &BTreeMap<StrikeKey, Record>| {
            for strike in records.keys() {
                if let Some(id) = strike_to_instrument.get(strike) {
                    id_to_osi.remove(id);
                }
            }
        };

        let put_strike_to_instrument: HashMap<StrikeKey, InstrumentId> = instrument_table
            .puts
            .iter()
            .map(|(&strike, (_, id))| (strike, id.clone()))
            .collect();
        let call_strike_to_instrument: HashMap<StrikeKey, InstrumentId> = instrument_table
            .calls
            .iter()
            .map(|(&strike, (_, id))| (strike, id.clone()))
            .collect();

        clear_filled(&mut id_to_osi, &put_strike_to_instrument, &chain.puts);
        clear_filled(&mut id_to_osi, &call_strike_to_instrument, &chain.calls);

        for (id, osi) in id_to_osi.drain() {
            let target = match osi.option_type() {
                OptionType::Put => &mut chain.puts,
                OptionType::Call => &mut chain.calls,
            };
            target.entry(osi.strike()).or_insert_with(|| Record::empty(Timestamp::from_nanos(0)));
            chain.missing_instruments.insert(id, osi);
        }

        chain
    }

    /// `|puts|>0 ∧ |calls|>0 ∧ (|puts|∪|calls|) > |missing_instruments|`.
    pub fn is_valid(&self) -> bool {
        if self.puts.is_empty() || self.calls.is_empty() {
            return false;
        }
        let union_strikes: HashSet<StrikeKey> = self.puts.keys().chain(self.calls.keys()).copied().collect();
        union_strikes.len() > self.missing_instruments.len()
    }

    /// Maximum `recv_time` over all non-empty records, or the zero
    /// timestamp for an empty chain.
    pub fn chain_time(&self) -> Timestamp {
        self.puts
            .values()
            .chain(self.calls.values())
            .filter(|record| !record.is_empty())
            .map(|record| record.recv_time)
            .max()
            .unwrap_or(Timestamp::from_nanos(0))
    }

    /// Composes `expiry_date` with `exchange_close`'s time-of-day in its
    /// timezone, converted to a UTC instant.
    pub fn expiry_time(&self, exchange_close: ExchangeClose) -> Result<Timestamp, ChainError> {
        let naive_time = chrono::NaiveTime::from_hms_opt(exchange_close.hour, exchange_close.minute, 0)
            .ok_or_else(|| ChainError::Internal("invalid exchange close time of day".to_string()))?;
        let naive_datetime = self.expiry_date.and_time(naive_time);
        let local = exchange_close
            .timezone
            .from_local_datetime(&naive_datetime)
            .single()
            .ok_or_else(|| {
                ChainError::Internal(format!(
                    "ambiguous or nonexistent local time composing expiry {} at {}:{} in {}",
                    self.expiry_date, exchange_close.hour, exchange_close.minute, exchange_close.timezone
                ))
            })?;
        Ok(Timestamp::from_utc_datetime(local.with_timezone(&chrono::Utc)))
    }

    /// `exp(-r * T)` with `T` the year fraction between `chain_time` and
    /// `expiry_time` (365.25 days/year).
    pub fn discount_factor(&self, rate: f64, exchange_close: ExchangeClose) -> Result<f64, ChainError> {
        let chain_time = self.chain_time();
        let expiry_time = self.expiry_time(exchange_close)?;
        if expiry_time < chain_time {
            return Err(ChainError::Internal(
                "expiry time must be after chain time".to_string(),
            ));
        }
        let seconds = (expiry_time - chain_time).as_micros() as f64 / 1_000_000.0;
        Ok((-rate * seconds / SECONDS_PER_YEAR).exp())
    }

    /// Runs `f` over every strike present on both sides, restricted to pairs
    /// passing the chosen validity predicate, returning strike-sorted
    /// results.
    fn on_matched_pairs<T>(
        &self,
        relaxed: bool,
        mut f: impl FnMut(StrikeKey, &Record, &Record) -> T,
    ) -> BTreeMap<StrikeKey, T> {
        let mut out = BTreeMap::new();
        for (&strike, call) in &self.calls {
            if let Some(put) = self.puts.get(&strike) {
                let matched = if relaxed {
                    put.bid_ask_valid() && call.bid_ask_valid()
                } else {
                    put.is_valid() && call.is_valid()
                };
                if matched {
                    out.insert(strike, f(strike, put, call));
                }
            }
        }
        out
    }

    fn pcp_rate(strike: StrikeKey, put: &Record, call: &Record, discount_factor: f64) -> f64 {
        let put_mid = put.mid().unwrap_or(f64::NAN);
        let call_mid = call.mid().unwrap_or(f64::NAN);
        call_mid - put_mid + strike.price() * discount_factor
    }

    /// Implied forward rate consistent with the chain's put/call records.
    /// Tries strictly valid pairs first (`Record::is_valid`), falls back to
    /// bid/ask-only validity, and fails only if neither pass finds a pair.
    pub fn parity_rate(&self, rate: f64, exchange_close: ExchangeClose) -> Result<f64, ChainError> {
        let discount_factor = self.discount_factor(rate, exchange_close)?;
        let strict = self.on_matched_pairs(false, |strike, put, call| Self::pcp_rate(strike, put, call, discount_factor));
        let rates = if !strict.is_empty() {
            strict
        } else {
            let relaxed = self.on_matched_pairs(true, |strike, put, call| Self::pcp_rate(strike, put, call, discount_factor));
            if relaxed.is_empty() {
                return Err(ChainError::GapFillFailure(format!(
                    "no valid put/call pairs to compute parity rate for {}/{}",
                    self.underlier, self.expiry_date
                )));
            }
            relaxed
        };

        let avg: f64 = rates.values().sum::<f64>() / rates.len() as f64;
        let parity_key = StrikeKey::from_price(avg);

        let keys: Vec<StrikeKey> = rates.keys().copied().collect();
        let upper_idx = keys.partition_point(|&k| k <= parity_key);
        let lower_idx = upper_idx.saturating_sub(2);
        let upper_idx = (upper_idx + 2).min(keys.len());

        let window = &keys[lower_idx..upper_idx];
        if window.is_empty() {
            return Err(ChainError::GapFillFailure(format!(
                "no parity rates in the neighbourhood of the average for {}/{}",
                self.underlier, self.expiry_date
            )));
        }
        let sum: f64 = window.iter().map(|k| rates[k]).sum();
        Ok(sum / window.len() as f64)
    }

    /// Variance of the residuals of a least-squares (strike, parity-rate)
    /// fit over strictly valid pairs — a measure of how internally
    /// consistent the chain's quotes are.
    pub fn parity_rate_quality(&self, rate: f64, exchange_close: ExchangeClose) -> Result<f64, ChainError> {
        let discount_factor = self.discount_factor(rate, exchange_close)?;
        let rates = self.on_matched_pairs(false, |strike, put, call| Self::pcp_rate(strike, put, call, discount_factor));
        let points: Vec<(f64, f64)> = rates.iter().map(|(k, v)| (k.price(), *v)).collect();
        let (slope, intercept) = crate::chain::gapfill::lsfit::fit_least_squares_line(&points).ok_or_else(|| {
            ChainError::GapFillFailure(format!(
                "not enough valid pairs to fit a parity-rate quality line for {}/{}",
                self.underlier, self.expiry_date
            ))
        })?;
        Ok(crate::chain::gapfill::lsfit::compute_variance_along_fitted_line(&points, slope, intercept))
    }

    /// The lookup key a [`crate::chain::cache::ChainCache`] stores this
    /// chain under: symbol, expiry and chain-time.
    pub fn cache_key_time(&self) -> Timestamp {
        self.chain_time()
    }
}

/// Converts a [`TimeRange`] difference to whole seconds, used where the
/// original divides a `std::chrono::duration` by a unit duration.
pub fn as_seconds(range: TimeRange) -> f64 {
    range.as_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::snapshot::record::PriceWeight;
    use crate::chain::symbology::osi::{OptionType, OsiIdentifier};
    use chrono_tz::America::New_York;

    fn close() -> ExchangeClose {
        ExchangeClose {
            hour: 16,
            minute: 0,
            timezone: New_York,
        }
    }

    fn record(bid: f64, ask: f64, recv_nanos: i64) -> Record {
        Record {
            trade: PriceWeight::new(bid, 1),
            trade_time: Timestamp::from_nanos(recv_nanos),
            bid: PriceWeight::new(bid, 1),
            ask: PriceWeight::new(ask, 1),
            recv_time: Timestamp::from_nanos(recv_nanos),
            comment: String::new(),
        }
    }

    fn record_without_trade(bid: f64, ask: f64, recv_nanos: i64) -> Record {
        Record {
            trade: PriceWeight::absent(),
            trade_time: Timestamp::from_nanos(recv_nanos),
            bid: PriceWeight::new(bid, 1),
            ask: PriceWeight::new(ask, 1),
            recv_time: Timestamp::from_nanos(recv_nanos),
            comment: String::new(),
        }
    }

    fn table_with_strikes(underlier: &str, expiry: NaiveDate, strikes: &[f64]) -> InstrumentTable {
        let mut table = InstrumentTable {
            underlier: underlier.to_string(),
            expiry_date: expiry,
            puts: std::collections::HashMap::new(),
            calls: std::collections::HashMap::new(),
        };
        for &strike in strikes {
            let key = StrikeKey::from_price(strike);
            let put_osi = OsiIdentifier::new(underlier, expiry, OptionType::Put, key);
            let call_osi = OsiIdentifier::new(underlier, expiry, OptionType::Call, key);
            table.puts.insert(key, (put_osi, format!("P{strike}")));
            table.calls.insert(key, (call_osi, format!("C{strike}")));
        }
        table
    }

    #[test]
    fn empty_chain_has_zero_chain_time_and_is_invalid() {
        let table = table_with_strikes("SPY", NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(), &[]);
        let chain = OptionChain::build(BTreeMap::new(), BTreeMap::new(), &table, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(chain.chain_time(), Timestamp::from_nanos(0));
        assert!(!chain.is_valid());
        assert!(chain.parity_rate(0.05, close()).is_err());
    }

    #[test]
    fn build_fills_missing_strikes_as_empty_and_tracks_missing_instruments() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let table = table_with_strikes("SPY", expiry, &[100.0, 105.0]);
        let mut puts = BTreeMap::new();
        puts.insert(StrikeKey::from_price(100.0), record(1.0, 1.2, 10));
        let mut calls = BTreeMap::new();
        calls.insert(StrikeKey::from_price(100.0), record(2.0, 2.2, 10));

        let chain = OptionChain::build(puts, calls, &table, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(chain.puts.len(), 2);
        assert_eq!(chain.calls.len(), 2);
        assert_eq!(chain.missing_instruments.len(), 2);
        assert!(chain.puts[&StrikeKey::from_price(105.0)].is_empty());
        assert!(chain.calls[&StrikeKey::from_price(105.0)].is_empty());
    }

    #[test]
    fn parity_rate_averages_matched_pairs_near_the_mean() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let table = table_with_strikes("SPY", expiry, &[95.0, 100.0, 105.0]);
        let mut puts = BTreeMap::new();
        let mut calls = BTreeMap::new();
        for strike in [95.0, 100.0, 105.0] {
            puts.insert(StrikeKey::from_price(strike), record(1.0, 1.2, 10));
            calls.insert(StrikeKey::from_price(strike), record(1.0, 1.2, 10));
        }
        let chain = OptionChain::build(puts, calls, &table, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let rate = chain.parity_rate(0.0, close()).unwrap();
        assert!(rate.is_finite());
    }

    #[test]
    fn strict_parity_pass_excludes_bid_ask_only_pairs_and_falls_back_to_relaxed() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let table = table_with_strikes("SPY", expiry, &[100.0]);
        let mut puts = BTreeMap::new();
        let mut calls = BTreeMap::new();
        // Bid/ask present on both legs but no trade print: passes
        // `bid_ask_valid` but must not satisfy the strict `is_valid` pass.
        puts.insert(StrikeKey::from_price(100.0), record_without_trade(1.0, 1.2, 10));
        calls.insert(StrikeKey::from_price(100.0), record_without_trade(2.0, 2.2, 10));

        let chain = OptionChain::build(puts, calls, &table, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let strict_pairs = chain.on_matched_pairs(false, |strike, _, _| strike);
        assert!(
            strict_pairs.is_empty(),
            "a pair with no trade print on either leg must not pass the strict validity predicate"
        );

        let relaxed_pairs = chain.on_matched_pairs(true, |strike, _, _| strike);
        assert_eq!(relaxed_pairs.len(), 1);

        // parity_rate must still succeed by falling back to the relaxed pass.
        let rate = chain.parity_rate(0.0, close()).unwrap();
        assert!(rate.is_finite());
    }
}
