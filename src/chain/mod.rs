//! Option-chain construction and repair pipeline.
//!
//! Retrieves historical US equity option chains from a remote market-data
//! provider, reconstructs strike-indexed put/call snapshots for a requested
//! valuation instant, heals gaps in the quote grid by exploiting put-call
//! parity, and emits tabular per-chain output.
//!
//! # Submodules
//!
//! - `types`: `Timestamp`/`TimeRange`, the two primitive time units used
//!   throughout the pipeline.
//! - `error`: the crate-wide `ChainError` enum and its `no_retry` classifier.
//! - `pool`: the blocking concurrency substrate (`TaskPool`, `JobPool`,
//!   `Retry`, `DelayedRetry`).
//! - `provider`: the abstract `QuoteProvider` interface and the
//!   `RateLimitedProvider` that fronts it with lane pools and request
//!   splitting.
//! - `symbology`: OSI identifier parsing, `StrikeKey`, and the
//!   per-(underlier, expiry) `InstrumentTable`.
//! - `planner`: `RequestPlanner`'s adaptive two-schema retrieval loop.
//! - `snapshot`: `SnapshotBuilder`'s reduction of raw ticks into per-strike
//!   records.
//! - `gapfill`: `GapFiller`'s put-call-parity based repair of missing or
//!   one-sided quotes.
//! - `model`: the assembled `OptionChain` and its timing/discounting/parity
//!   utilities.
//! - `cache`: the per-symbol in-memory `ChainCache`.
//! - `market_environment`: the abstract `MarketEnvironment` rate/exchange-
//!   close interface.
//! - `sink`: CSV rendering of a gap-filled chain and the missing-chain notice.
//! - `config`: the typed configuration surface consumed by the orchestrator.
//! - `orchestrator`: the per-symbol batch driver tying every stage together.

pub mod cache;
pub mod config;
pub mod error;
pub mod gapfill;
pub mod market_environment;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod provider;
pub mod sink;
pub mod snapshot;
pub mod symbology;
pub mod types;

pub use cache::ChainCache;
pub use config::Config;
pub use error::ChainError;
pub use model::OptionChain;
pub use orchestrator::Orchestrator;
