//! Per-symbol batch driver: one [`JobPool`] job runs the whole retrieve,
//! cache-submit, gap-fill, persist sequence for a single underlier, so
//! calls within a job proceed in program order while different symbols'
//! jobs run fully concurrently.
//!
//! Grounded on `RequesterSynchronous::getOptionChains`: ensure the market
//! environment is registered, resolve the instrument table, enumerate
//! expiries within the DTE window, run the planner and snapshot reduction
//! per expiry, submit the raw chain (or record it missing), then fetch an
//! enhanced (gap-filled) copy of every chain that made it into the cache
//! and persist it, finally writing the missing-chain notice if anything
//! was left out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeZone};

use crate::chain::cache::ChainCache;
use crate::chain::config::Config;
use crate::chain::error::ChainError;
use crate::chain::market_environment::MarketEnvironment;
use crate::chain::planner::request_planner::{PlannerBudget, RequestPlanner};
use crate::chain::pool::job_pool::{JobId, JobOutcome, JobPool, JobStatus, UnknownJobError};
use crate::chain::provider::QuoteProvider;
use crate::chain::sink::CsvSink;
use crate::chain::snapshot::SnapshotBuilder;
use crate::chain::symbology::model::{InstrumentId, SymbologyModel};
use crate::chain::symbology::osi::OsiIdentifier;
use crate::chain::types::{TimeRange, Timestamp};

/// Cooperative cancellation, polled at the top of a symbol's job and again
/// before each expiry iteration. `true` means "stop submitting further
/// work"; already-dispatched provider calls still run to completion.
pub type TerminateSignal = Arc<dyn Fn() -> bool + Send + Sync>;

/// Parses a `config.time` value of the form `HH:MM:SS` or `HH:MM`.
fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ChainError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| ChainError::Authentication(format!("invalid config.time {raw:?}: {e}")))
}

/// Composes a date and time-of-day in `tz` into a UTC instant, the same
/// disambiguation the sink uses to compose an expiry date with an exchange
/// close.
fn localize(date: NaiveDate, time: NaiveTime, tz: chrono_tz::Tz) -> Result<Timestamp, ChainError> {
    let naive = date.and_time(time);
    let local = tz
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ChainError::Authentication(format!("ambiguous or nonexistent local time {naive} in {tz}")))?;
    Ok(Timestamp::from_utc_datetime(local.with_timezone(&chrono::Utc)))
}

/// Runs the full per-symbol pipeline once. A free function (rather than a
/// method) so it can be moved into a [`JobPool`] job without borrowing
/// `Orchestrator` itself.
#[allow(clippy::too_many_arguments)]
fn process_symbol(
    provider: &dyn QuoteProvider,
    dataset: &str,
    symbology: &SymbologyModel,
    cache: &ChainCache,
    sink: &CsvSink,
    config: &Config,
    symbol: &str,
    valuation_date: NaiveDate,
    environment: &Arc<dyn MarketEnvironment>,
    terminate_signal: &(dyn Fn() -> bool + Send + Sync),
) -> Result<(), ChainError> {
    if terminate_signal() {
        return Ok(());
    }
    cache.register_environment(symbol, Arc::clone(environment));

    let exchange_close = environment.exchange_close();
    let time_of_day = parse_time_of_day(&config.time)?;
    let valuation_time = localize(valuation_date, time_of_day, exchange_close.timezone)?;

    let expiries = symbology.expiries_within_dte(provider, symbol, valuation_date, config.dte)?;

    let planner = RequestPlanner::new(provider, dataset);
    let budget = PlannerBudget {
        n_max_records: config.n_max_records,
        buffer_overflow_retries: config.buffer_overflow_retries as u32,
        split_threshold: config.split_threshold as usize,
    };
    let window_one_second = TimeRange::from_micros_unchecked(config.cbbo1stimerange_us);
    let window_one_minute = TimeRange::from_micros_unchecked(config.cbbo1mtimerange_us);
    let tolerance = TimeRange::from_micros_unchecked(config.lookuptimerange_us);

    let mut missing: Vec<(Timestamp, NaiveDate)> = Vec::new();
    let mut submitted: Vec<NaiveDate> = Vec::new();

    for expiry in expiries {
        if terminate_signal() {
            break;
        }

        let table = match symbology.instrument_table(provider, symbol, valuation_date, expiry) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(symbol, %expiry, error = %e, "failed to resolve instrument table");
                missing.push((valuation_time, expiry));
                continue;
            }
        };
        let id_to_osi: HashMap<InstrumentId, OsiIdentifier> = table
            .puts
            .values()
            .chain(table.calls.values())
            .map(|(osi, id)| (id.clone(), osi.clone()))
            .collect();

        match planner.fetch_chain(&id_to_osi, valuation_time, window_one_second, window_one_minute, budget) {
            Ok(msgs) => {
                let chain = SnapshotBuilder::build(msgs, &table, valuation_date);
                if chain.is_valid() {
                    let chain_time = chain.chain_time();
                    cache.submit(chain);
                    tracing::info!(symbol, %expiry, %chain_time, "submitted");
                    submitted.push(expiry);
                } else {
                    tracing::warn!(symbol, %expiry, "chain invalid after snapshot reduction, recording as missing");
                    missing.push((chain.chain_time(), expiry));
                }
            }
            Err(e) => {
                tracing::warn!(symbol, %expiry, error = %e, "received-error");
                missing.push((valuation_time, expiry));
            }
        }
    }

    for expiry in submitted {
        if terminate_signal() {
            break;
        }
        match cache.get_enhanced(symbol, valuation_time, expiry, tolerance) {
            Ok(enhanced) => {
                if let Err(e) = sink.persist(&enhanced, environment.as_ref()) {
                    tracing::warn!(symbol, %expiry, error = %e, "failed to persist chain");
                }
            }
            Err(e) => {
                tracing::warn!(symbol, %expiry, error = %e, "failed to fetch enhanced chain for persistence");
            }
        }
    }

    sink.persist_missing(symbol, valuation_date, &missing)
}

/// Owns the job lane every symbol's pipeline is submitted to. Lane pools
/// for symbology/timeseries RPCs live one level down, inside whatever
/// [`QuoteProvider`] is handed to [`Orchestrator::new`] (typically a
/// [`crate::chain::provider::RateLimitedProvider`]); this pool's thread
/// count should stay above the lane pools' so jobs can block awaiting a
/// lane slot without starving the lanes themselves.
pub struct Orchestrator {
    provider: Arc<dyn QuoteProvider>,
    dataset: String,
    symbology: Arc<SymbologyModel>,
    cache: Arc<ChainCache>,
    sink: Arc<CsvSink>,
    config: Config,
    job_pool: JobPool,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn QuoteProvider>, dataset: impl Into<String>, cache: Arc<ChainCache>, config: Config, n_job_threads: usize) -> Self {
        let dataset = dataset.into();
        let symbology = Arc::new(SymbologyModel::new(dataset.clone()));
        let sink = Arc::new(CsvSink::new(&config));
        Self {
            provider,
            dataset,
            symbology,
            cache,
            sink,
            config,
            job_pool: JobPool::new(n_job_threads),
        }
    }

    /// Posts one symbol's pipeline as a job, returning immediately with its
    /// id. `environment` is registered with the cache as a side effect of
    /// the job running, not synchronously here.
    pub fn submit_symbol(
        &self,
        symbol: impl Into<String>,
        valuation_date: NaiveDate,
        environment: Arc<dyn MarketEnvironment>,
        terminate_signal: TerminateSignal,
    ) -> JobId {
        let symbol = symbol.into();
        let provider = Arc::clone(&self.provider);
        let dataset = self.dataset.clone();
        let symbology = Arc::clone(&self.symbology);
        let cache = Arc::clone(&self.cache);
        let sink = Arc::clone(&self.sink);
        let config = self.config.clone();

        self.job_pool.post(move || {
            process_symbol(
                provider.as_ref(),
                &dataset,
                symbology.as_ref(),
                cache.as_ref(),
                sink.as_ref(),
                &config,
                &symbol,
                valuation_date,
                &environment,
                terminate_signal.as_ref(),
            )
        })
    }

    pub fn query(&self, id: JobId) -> Result<JobStatus, UnknownJobError> {
        self.job_pool.query(id)
    }

    /// Blocks until at least one submitted symbol's job completes.
    pub fn query_all(&self) -> HashMap<JobId, JobOutcome> {
        self.job_pool.query_all()
    }
}
