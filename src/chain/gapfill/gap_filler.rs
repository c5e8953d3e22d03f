//! Put-call-parity based gap repair.
//!
//! Grounded on `OptionRecordGapFiller::fillGaps` and its nested `Algos`:
//! spread-fit each side first, prune strikes that never had a matching
//! counterpart on the other side, then use the chain's own parity rate to
//! estimate an at-the-money price and fit interior/tail put-call-parity
//! curves for whatever strikes are still missing a two-sided quote. Any
//! failure past the spread-fit step degrades gracefully: the chain already
//! has its spread fit applied and is returned as-is.

use std::collections::{BTreeMap, HashMap};

use crate::chain::error::ChainError;
use crate::chain::gapfill::lsfit::fit_least_squares_line;
use crate::chain::market_environment::{ExchangeClose, MarketEnvironment};
use crate::chain::model::OptionChain;
use crate::chain::snapshot::record::{PriceWeight, Record};
use crate::chain::symbology::osi::StrikeKey;

/// A chain's put/call records after spread-fit, orphan-pruning and (if the
/// advanced steps succeeded) put-call-parity gap fills.
pub struct GapFillResult {
    pub chain: OptionChain,
    pub orphaned_puts: Vec<StrikeKey>,
    pub orphaned_calls: Vec<StrikeKey>,
}

#[derive(Debug, Clone, Copy)]
struct PcpEntry {
    valid: bool,
    pcp_rate: f64,
    put_mid: f64,
    call_mid: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FitType {
    Start,
    Gap,
    End,
}

#[derive(Debug, Clone, Copy)]
struct LSFit {
    slope: f64,
    intercept: f64,
    fit_type: FitType,
    lower_key: Option<StrikeKey>,
    upper_key: Option<StrikeKey>,
}

/// Stateless namespace for the gap-repair steps, run in sequence by
/// [`GapFiller::fill_gaps`].
pub struct GapFiller;

impl GapFiller {
    pub fn fill_gaps(chain: &OptionChain, market_environment: &dyn MarketEnvironment) -> GapFillResult {
        let mut filled = chain.clone();
        Self::spread_fit(&mut filled.calls);
        Self::spread_fit(&mut filled.puts);

        let exchange_close = market_environment.exchange_close();
        let rate = match market_environment.rate(filled.valuation_date, filled.expiry_date) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "unable to resolve rate for gap-fill, returning spread-fit only chain");
                return GapFillResult {
                    chain: filled,
                    orphaned_puts: Vec::new(),
                    orphaned_calls: Vec::new(),
                };
            }
        };
        let discount_factor = match filled.discount_factor(rate, exchange_close) {
            Ok(df) => df,
            Err(e) => {
                tracing::warn!(error = %e, "unable to compute discount factor, returning spread-fit only chain");
                return GapFillResult {
                    chain: filled,
                    orphaned_puts: Vec::new(),
                    orphaned_calls: Vec::new(),
                };
            }
        };

        let pcp_map = Self::match_put_call(&filled, discount_factor);
        let orphaned_calls = Self::remove_not_in_keys(&mut filled.calls, &pcp_map);
        let orphaned_puts = Self::remove_not_in_keys(&mut filled.puts, &pcp_map);

        if let Err(e) = Self::try_advanced_fill(&mut filled, &pcp_map, discount_factor, rate, exchange_close) {
            tracing::warn!(error = %e, "failed to perform advanced gap-fill operations");
        }

        GapFillResult {
            chain: filled,
            orphaned_puts,
            orphaned_calls,
        }
    }

    /// For each record with only one side of bid/ask present, fills the
    /// missing side from a least-squares fit of strike-to-spread over every
    /// fully quoted record on the same side.
    fn spread_fit(records: &mut BTreeMap<StrikeKey, Record>) {
        let mut spread_points = Vec::new();
        let mut fit_keys = Vec::new();
        for (&strike, record) in records.iter() {
            if let Some(spread) = record.spread() {
                spread_points.push((strike.price(), spread));
            } else if record.any_bid_ask_valid() {
                fit_keys.push(strike);
            }
        }
        if fit_keys.is_empty() {
            return;
        }
        let Some((slope, intercept)) = fit_least_squares_line(&spread_points) else {
            tracing::warn!("unable to perform spread-fit: not enough valid spread points");
            return;
        };
        for strike in fit_keys {
            let fitted_spread = (strike.price() * slope + intercept).max(0.01);
            let record = records.get_mut(&strike).expect("fit_keys drawn from records");
            if record.ask.is_present() {
                record.bid = PriceWeight::new((record.ask.price - fitted_spread).max(0.0), 1);
            } else {
                record.ask = PriceWeight::new(record.bid.price + fitted_spread, 1);
            }
            record.push_comment("spread-fit");
        }
    }

    /// Put-call-parity rate (and both legs' mids) for every strike present
    /// on both sides, marked invalid when either side isn't bid/ask valid.
    fn match_put_call(chain: &OptionChain, discount_factor: f64) -> BTreeMap<StrikeKey, PcpEntry> {
        let mut map = BTreeMap::new();
        for (&strike, call) in &chain.calls {
            let Some(put) = chain.puts.get(&strike) else {
                continue;
            };
            if put.bid_ask_valid() && call.bid_ask_valid() {
                let put_mid = put.mid().expect("bid_ask_valid implies mid");
                let call_mid = call.mid().expect("bid_ask_valid implies mid");
                let pcp_rate = call_mid - put_mid + strike.price() * discount_factor;
                map.insert(
                    strike,
                    PcpEntry {
                        valid: true,
                        pcp_rate,
                        put_mid,
                        call_mid,
                    },
                );
            } else {
                map.insert(
                    strike,
                    PcpEntry {
                        valid: false,
                        pcp_rate: f64::NAN,
                        put_mid: f64::NAN,
                        call_mid: f64::NAN,
                    },
                );
            }
        }
        map
    }

    /// Drops any record whose strike has no entry in `pcp_map` (no matching
    /// counterpart on the other side), returning the dropped strikes.
    fn remove_not_in_keys(records: &mut BTreeMap<StrikeKey, Record>, pcp_map: &BTreeMap<StrikeKey, PcpEntry>) -> Vec<StrikeKey> {
        let orphaned: Vec<StrikeKey> = records.keys().filter(|k| !pcp_map.contains_key(k)).copied().collect();
        for strike in &orphaned {
            records.remove(strike);
        }
        orphaned
    }

    fn try_advanced_fill(
        filled: &mut OptionChain,
        pcp_map: &BTreeMap<StrikeKey, PcpEntry>,
        discount_factor: f64,
        rate: f64,
        exchange_close: ExchangeClose,
    ) -> Result<(), ChainError> {
        let parity_rate = filled.parity_rate(rate, exchange_close)?;
        let put_atm_price = Self::estimate_atm_price(&filled.puts, parity_rate)?;
        let call_atm_price = Self::estimate_atm_price(&filled.calls, parity_rate)?;
        let fits = Self::fit_pcp_rate_for_gaps(pcp_map);
        Self::fill_fit_values(&fits, &mut filled.puts, &mut filled.calls, discount_factor, (put_atm_price + call_atm_price) / 2.0);
        Ok(())
    }

    /// Finds the two `bid_ask_valid` records straddling `parity_rate` and
    /// averages their mids, failing if they're more than four strikes apart
    /// or don't exist on both sides of the parity key.
    fn estimate_atm_price(records: &BTreeMap<StrikeKey, Record>, parity_rate: f64) -> Result<f64, ChainError> {
        let atm_key = StrikeKey::from_price(parity_rate);
        let keys: Vec<StrikeKey> = records.keys().copied().collect();
        let idx = keys.partition_point(|&k| k < atm_key);
        if idx == 0 {
            return Err(ChainError::GapFillFailure(format!(
                "no strike below the ATM key for parity rate {parity_rate}"
            )));
        }

        let mut previous_idx = idx - 1;
        while previous_idx > 0 && !records[&keys[previous_idx]].bid_ask_valid() {
            previous_idx -= 1;
        }
        let mut lower_idx = idx;
        while lower_idx < keys.len() && !records[&keys[lower_idx]].bid_ask_valid() {
            lower_idx += 1;
        }

        if lower_idx < keys.len() && records[&keys[previous_idx]].bid_ask_valid() {
            let distance = lower_idx - previous_idx;
            if distance < 4 {
                let mid_previous = records[&keys[previous_idx]].mid().expect("bid_ask_valid implies mid");
                let mid_lower = records[&keys[lower_idx]].mid().expect("bid_ask_valid implies mid");
                return Ok((mid_previous + mid_lower) / 2.0);
            }
        }
        Err(ChainError::GapFillFailure(format!(
            "failed to estimate ATM price for parity rate {parity_rate}"
        )))
    }

    /// Builds a least-squares fit per strike lacking a valid parity rate:
    /// an interior fit bracketed by valid neighbours for a contiguous gap,
    /// or a log-linear tail fit when the gap runs off either end of the
    /// strike range.
    fn fit_pcp_rate_for_gaps(pcp_map: &BTreeMap<StrikeKey, PcpEntry>) -> HashMap<StrikeKey, LSFit> {
        let keys: Vec<StrikeKey> = pcp_map.keys().copied().collect();
        let mut fits: HashMap<StrikeKey, LSFit> = HashMap::new();
        let mut current_gap: Vec<StrikeKey> = Vec::new();
        let mut previous_valid_idx: Option<usize> = None;

        for (i, &key) in keys.iter().enumerate() {
            if !pcp_map[&key].valid {
                current_gap.push(key);
                continue;
            }
            if !current_gap.is_empty() {
                match previous_valid_idx {
                    Some(prev_idx) => Self::gap_fitter(pcp_map, &keys, prev_idx, i, &current_gap, &mut fits),
                    None => Self::start_fitter(pcp_map, &keys, i, &current_gap, &mut fits),
                }
                current_gap.clear();
            }
            previous_valid_idx = Some(i);
        }
        if !current_gap.is_empty() {
            if let Some(prev_idx) = previous_valid_idx {
                Self::end_fitter(pcp_map, &keys, prev_idx, &current_gap, &mut fits);
            }
        }
        fits
    }

    fn put_fit(fits: &mut HashMap<StrikeKey, LSFit>, current_gap: &[StrikeKey], points: &[(f64, f64)], fit_type: FitType, lower_key: Option<StrikeKey>, upper_key: Option<StrikeKey>) {
        let Some((slope, intercept)) = fit_least_squares_line(points) else {
            return;
        };
        let fit = LSFit {
            slope,
            intercept,
            fit_type,
            lower_key,
            upper_key,
        };
        for &key in current_gap {
            fits.insert(key, fit);
        }
    }

    fn gap_fitter(pcp_map: &BTreeMap<StrikeKey, PcpEntry>, keys: &[StrikeKey], previous_idx: usize, next_idx: usize, current_gap: &[StrikeKey], fits: &mut HashMap<StrikeKey, LSFit>) {
        let mut points = Vec::new();
        let mut p = previous_idx;
        while p > 0 {
            p -= 1;
            let entry = pcp_map[&keys[p]];
            if entry.valid {
                points.push((keys[p].price(), entry.pcp_rate));
                break;
            }
        }
        points.push((keys[previous_idx].price(), pcp_map[&keys[previous_idx]].pcp_rate));
        points.push((keys[next_idx].price(), pcp_map[&keys[next_idx]].pcp_rate));
        let upper_key = keys[next_idx];
        let mut n = next_idx;
        while n + 1 < keys.len() {
            n += 1;
            let entry = pcp_map[&keys[n]];
            if entry.valid {
                points.push((keys[n].price(), entry.pcp_rate));
                break;
            }
        }
        Self::put_fit(fits, current_gap, &points, FitType::Gap, Some(keys[previous_idx]), Some(upper_key));
    }

    const MIN_TAIL_POINTS: usize = 24;
    const MIN_TAIL_POINTS_USABLE: usize = Self::MIN_TAIL_POINTS / 6;
    const LOG_FLOOR: f64 = 1e-9;

    fn start_fitter(pcp_map: &BTreeMap<StrikeKey, PcpEntry>, keys: &[StrikeKey], next_idx: usize, current_gap: &[StrikeKey], fits: &mut HashMap<StrikeKey, LSFit>) {
        let upper_key = keys[next_idx];
        let mut points = Vec::new();
        let mut idx = next_idx;
        loop {
            let entry = pcp_map[&keys[idx]];
            if entry.valid {
                points.push((keys[idx].price(), entry.put_mid.max(Self::LOG_FLOOR).ln()));
            }
            if points.len() >= Self::MIN_TAIL_POINTS || idx + 1 >= keys.len() {
                break;
            }
            idx += 1;
        }
        if points.len() >= Self::MIN_TAIL_POINTS_USABLE {
            Self::put_fit(fits, current_gap, &points, FitType::Start, None, Some(upper_key));
        }
    }

    fn end_fitter(pcp_map: &BTreeMap<StrikeKey, PcpEntry>, keys: &[StrikeKey], last_idx: usize, current_gap: &[StrikeKey], fits: &mut HashMap<StrikeKey, LSFit>) {
        let lower_key = keys[last_idx];
        let mut points = Vec::new();
        let mut idx = last_idx;
        loop {
            let entry = pcp_map[&keys[idx]];
            if entry.valid {
                points.insert(0, (keys[idx].price(), entry.call_mid.max(Self::LOG_FLOOR).ln()));
            }
            let at_begin = idx == 0;
            if !at_begin {
                idx -= 1;
            }
            if points.len() >= Self::MIN_TAIL_POINTS || idx == 0 {
                break;
            }
        }
        if points.len() >= Self::MIN_TAIL_POINTS_USABLE {
            Self::put_fit(fits, current_gap, &points, FitType::End, Some(lower_key), None);
        }
    }

    fn average_spread(records: &BTreeMap<StrikeKey, Record>, key1: StrikeKey, key2: StrikeKey) -> Option<f64> {
        let s1 = records.get(&key1)?.spread()?;
        let s2 = records.get(&key2)?.spread()?;
        Some((s1 + s2) / 2.0)
    }

    fn interpolate(records: &BTreeMap<StrikeKey, Record>, target_strike: f64, lower_key: StrikeKey, upper_key: StrikeKey) -> Option<f64> {
        let lower = records.get(&lower_key)?;
        let upper = records.get(&upper_key)?;
        if !lower.bid_ask_valid() || !upper.bid_ask_valid() {
            return None;
        }
        let lower_mid = lower.mid()?;
        let upper_mid = upper.mid()?;
        let lower_strike = lower_key.price();
        let upper_strike = upper_key.price();
        if (upper_strike - lower_strike).abs() < f64::EPSILON {
            return None;
        }
        Some(lower_mid + (upper_mid - lower_mid) * (target_strike - lower_strike) / (upper_strike - lower_strike))
    }

    fn fill_fit_values(fits: &HashMap<StrikeKey, LSFit>, puts: &mut BTreeMap<StrikeKey, Record>, calls: &mut BTreeMap<StrikeKey, Record>, discount_factor: f64, atm_price: f64) {
        for (&strike, fit) in fits {
            let Some(put_record) = puts.get(&strike).cloned() else {
                continue;
            };
            let Some(call_record) = calls.get(&strike).cloned() else {
                continue;
            };

            match fit.fit_type {
                FitType::Gap => {
                    let pcp_rate_est = fit.slope * strike.price() + fit.intercept;
                    let (Some(lower_key), Some(upper_key)) = (fit.lower_key, fit.upper_key) else {
                        continue;
                    };

                    if !put_record.bid_ask_valid() && call_record.bid_ask_valid() {
                        let call_mid = call_record.mid().expect("bid_ask_valid implies mid");
                        let mut computed_price = call_mid + strike.price() * discount_factor - pcp_rate_est;
                        let mut tag = "pcp-fit";
                        if computed_price < atm_price / 4.0 {
                            if let Some(interp) = Self::interpolate(puts, strike.price(), lower_key, upper_key) {
                                computed_price = interp;
                                tag = "lin-interpol";
                            }
                        }
                        let Some(spread) = Self::average_spread(puts, lower_key, upper_key) else {
                            continue;
                        };
                        let recv_time = puts.get(&upper_key).map(|r| r.recv_time);
                        if let Some(record) = puts.get_mut(&strike) {
                            record.ask = PriceWeight::new(computed_price + spread / 2.0, 1);
                            record.bid = PriceWeight::new((computed_price - spread / 2.0).max(0.0), 1);
                            record.push_comment(tag);
                            if let Some(recv_time) = recv_time {
                                record.recv_time = recv_time;
                            }
                        }
                    } else if !call_record.bid_ask_valid() && put_record.bid_ask_valid() {
                        let put_mid = put_record.mid().expect("bid_ask_valid implies mid");
                        let mut computed_price = put_mid + pcp_rate_est - strike.price() * discount_factor;
                        let mut tag = "pcp-fit";
                        if computed_price < atm_price / 4.0 {
                            if let Some(interp) = Self::interpolate(calls, strike.price(), lower_key, upper_key) {
                                computed_price = interp;
                                tag = "lin-interpol";
                            }
                        }
                        let Some(spread) = Self::average_spread(calls, lower_key, upper_key) else {
                            continue;
                        };
                        let recv_time = calls.get(&lower_key).map(|r| r.recv_time);
                        if let Some(record) = calls.get_mut(&strike) {
                            record.ask = PriceWeight::new(computed_price + spread / 2.0, 1);
                            record.bid = PriceWeight::new((computed_price - spread / 2.0).max(0.0), 1);
                            record.push_comment(tag);
                            if let Some(recv_time) = recv_time {
                                record.recv_time = recv_time;
                            }
                        }
                    }
                }
                FitType::Start => {
                    let Some(upper_key) = fit.upper_key else { continue };
                    let Some(anchor) = puts.get(&upper_key) else { continue };
                    let Some(spread) = anchor.spread() else { continue };
                    let recv_time = anchor.recv_time;
                    let price = (strike.price() * fit.slope + fit.intercept).exp();
                    if let Some(record) = puts.get_mut(&strike) {
                        record.ask = PriceWeight::new(price + spread / 2.0, 1);
                        record.bid = PriceWeight::new((price - spread / 2.0).max(0.0), 1);
                        record.push_comment("log-extrapolate");
                        record.recv_time = recv_time;
                    }
                }
                FitType::End => {
                    let Some(lower_key) = fit.lower_key else { continue };
                    let Some(anchor) = calls.get(&lower_key) else { continue };
                    let Some(spread) = anchor.spread() else { continue };
                    let recv_time = anchor.recv_time;
                    let price = (strike.price() * fit.slope + fit.intercept).exp();
                    if let Some(record) = calls.get_mut(&strike) {
                        record.ask = PriceWeight::new(price + spread / 2.0, 1);
                        record.bid = PriceWeight::new((price - spread / 2.0).max(0.0), 1);
                        record.push_comment("log-extrapolate");
                        record.recv_time = recv_time;
                    }
                }
            }
        }
    }
}
