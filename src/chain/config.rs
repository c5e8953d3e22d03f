//! Configuration surface consumed by [`crate::chain::orchestrator::Orchestrator`],
//! [`crate::chain::planner::request_planner::RequestPlanner`] and the CSV sink.
//!
//! Populating this struct from argv or a config file is out of scope here;
//! only the typed options and their defaults are. Defaults follow the
//! original implementation's literal constants where spec.md quotes them,
//! and are recorded as Open-Question decisions in DESIGN.md where it does not.

use serde::Deserialize;

/// Column layout for the CSV sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvLayout {
    /// Puts and calls rendered as adjacent column blocks in one row per strike.
    SideBySide,
    /// Puts and calls rendered as separate rows, stacked under a `side` column.
    Stacked,
}

impl Default for CsvLayout {
    fn default() -> Self {
        CsvLayout::SideBySide
    }
}

/// All options enumerated in spec.md §6, typed and defaulted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Underlier symbols to process, e.g. `["SPY", "QQQ"]`.
    pub symbols: Vec<String>,

    /// Valuation date, `YYYY-MM-DD`.
    pub date: String,

    /// Valuation time of day, `HH:MM:SS`, interpreted in the exchange's
    /// local timezone per symbol's `MarketEnvironment`.
    pub time: String,

    /// Number of calendar days ahead of `date` to enumerate expiries within.
    pub dte: u32,

    /// Root directory for sink output.
    pub basepath: String,

    /// Whether sink output is nested under a `<date>` subdirectory.
    pub outdatedirs: bool,

    /// CSV column layout (side-by-side or stacked).
    pub csvstacked: bool,

    /// Flat risk-free rate used when no yield curve is registered for a symbol.
    pub riskfreerate: f64,

    /// Path to a yield-curve CSV; parsing it is out of scope (consumers
    /// implement `MarketEnvironment` themselves).
    pub yieldcurve: Option<String>,

    /// Worker thread count for the symbology lane, 1-10.
    pub symbologythreads: u64,

    /// Worker thread count for the timeseries lane, 1-100.
    pub timeseriesthreads: u64,

    /// Retry budget for transient request failures, 0-5.
    pub retries: u64,

    /// Lookup leniency for `ChainCache::get`, in microseconds.
    pub lookuptimerange_us: i64,

    /// Lookback window for the one-second CBBO schema pass, in microseconds.
    pub cbbo1stimerange_us: i64,

    /// Lookback window for the one-minute CBBO schema pass, in microseconds.
    pub cbbo1mtimerange_us: i64,

    /// Optional external script invoked to resolve provider API keys;
    /// invoking it is out of scope, only the path is carried.
    pub keyscript: Option<String>,

    /// `tracing` filter directive, e.g. `"info"` or `"straddle=debug"`.
    pub loglevel: String,

    /// Whether log lines include the originating OS thread id.
    pub logthreadid: bool,

    /// Maximum CBBO records requested per instrument per sub-window before
    /// the provider's decoder risks a buffer overflow.
    pub n_max_records: u64,

    /// Retry budget specifically for decoder-overflow-driven budget halving,
    /// independent of `retries` (which governs transient-failure retries).
    pub buffer_overflow_retries: u64,

    /// Maximum instrument ids per timeseries request before
    /// `RateLimitedProvider` splits the request into balanced sub-requests.
    pub split_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            date: String::new(),
            time: "16:00:00".to_string(),
            dte: 45,
            basepath: ".".to_string(),
            outdatedirs: true,
            csvstacked: false,
            riskfreerate: 0.05,
            yieldcurve: None,
            symbologythreads: 2,
            timeseriesthreads: 8,
            retries: 2,
            lookuptimerange_us: 5 * 60 * 1_000_000,
            cbbo1stimerange_us: 10 * 1_000_000,
            cbbo1mtimerange_us: 30 * 60 * 1_000_000,
            keyscript: None,
            loglevel: "info".to_string(),
            logthreadid: false,
            n_max_records: 1600,
            buffer_overflow_retries: 3,
            split_threshold: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.n_max_records, 1600);
        assert_eq!(config.split_threshold, 100);
        assert_eq!(config.buffer_overflow_retries, 3);
        assert_eq!(config.symbologythreads, 2);
        assert_eq!(config.timeseriesthreads, 8);
        assert_eq!(config.retries, 2);
    }
}
