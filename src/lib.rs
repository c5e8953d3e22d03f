//! `straddle`: historical US equity option-chain retrieval, snapshot
//! assembly and put-call-parity gap repair.
//!
//! Given a remote market-data provider (anything implementing
//! [`chain::provider::QuoteProvider`]), `straddle` resolves an underlier's
//! listed options for a valuation instant, reconstructs a strike-indexed
//! put/call snapshot from the provider's consolidated best-bid-offer
//! history, heals missing or one-sided quotes by fitting put-call parity
//! across the chain, and renders the result as CSV.
//!
//! # `straddle` Features
//!
//! - **Rate-limit aware**: symbology and timeseries requests run on
//!   independently sized worker lanes ([`chain::provider::RateLimitedProvider`]),
//!   so a provider's per-endpoint rate limit maps directly onto a thread
//!   count rather than a hand-rolled token bucket.
//! - **Adaptive request planning**: [`chain::planner::RequestPlanner`] shrinks
//!   its per-request record budget on decoder-buffer overflow and falls back
//!   from a one-second to a one-minute quote schema for instruments that
//!   stay illiquid.
//! - **Arbitrage-consistent gap filling**: [`chain::gapfill::GapFiller`] fits
//!   a spread model, a put-call-parity curve, and log-linear tail
//!   extrapolation to complete a chain's missing or half-sided quotes
//!   without ever overwriting a valid observation.
//! - **Distributed logging**: pool submissions, retries, planner budget
//!   halving, and gap-fill bail-outs are all traced via the `tracing` crate.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//!
//! use chrono::NaiveDate;
//! use straddle::chain::{Config, ChainCache, Orchestrator};
//! use straddle::chain::market_environment::{ExchangeClose, FlatRateEnvironment};
//!
//! fn main() {
//!     tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
//!
//!     let config = Config {
//!         symbols: vec!["SPY".to_string()],
//!         date: "2025-04-02".to_string(),
//!         basepath: "./out".to_string(),
//!         ..Config::default()
//!     };
//!
//!     let provider: Arc<dyn straddle::chain::provider::QuoteProvider> = todo!("vendor integration");
//!     let cache = Arc::new(ChainCache::new());
//!     let orchestrator = Orchestrator::new(
//!         provider,
//!         "opra-pillar",
//!         cache,
//!         config,
//!         /* job pool threads = */ 4,
//!     );
//!
//!     let environment: Arc<dyn straddle::chain::market_environment::MarketEnvironment> = Arc::new(
//!         FlatRateEnvironment::new(0.05, ExchangeClose { hour: 16, minute: 0, timezone: chrono_tz::America::New_York }),
//!     );
//!     let valuation_date = NaiveDate::from_ymd_opt(2025, 4, 2).unwrap();
//!     let id = orchestrator.submit_symbol("SPY", valuation_date, environment, Arc::new(|| false));
//!
//!     let mut done = std::collections::HashMap::new();
//!     while !done.contains_key(&id) {
//!         done.extend(orchestrator.query_all());
//!     }
//! }
//! ```
//!
//! # Disclaimer
//!
//! **Important Notice**:
//!
//! * The `straddle` crate is currently in development and should be
//!   considered unstable. The API is subject to change without notice, and
//!   breaking changes are likely to occur.
//!
//! * The software is provided "as-is" without any warranties, express or
//!   implied. The author and contributors do not take responsibility for
//!   any financial losses, damages, or other issues that may arise from the
//!   use of this project.
#![warn(rust_2018_idioms)]
#![allow(private_interfaces, unused)]

pub mod chain;
