//! Abstract provider interface and the rate-limited pool that fronts it.
//!
//! The wire protocol/codec that actually talks to a market-data vendor is
//! out of scope: `QuoteProvider` is the capability interface a consumer
//! implements, mirroring the original's abstract `Getter` base class and
//! the teacher's pattern of representing an external integration as a
//! trait (`manja::kite::traits::KiteConfig`) rather than a concrete struct.

pub mod rate_limited;
pub mod types;

pub use rate_limited::RateLimitedProvider;
pub use types::{CbboMsg, Schema, SymbologyEntry};

use chrono::NaiveDate;

use crate::chain::error::ChainError;
use crate::chain::symbology::osi::OsiIdentifier;
use crate::chain::types::{TimeRange, Timestamp};

/// Resolution of every OSI identifier for an underlier to the provider
/// instrument ids valid during each date range.
pub type SymbologyResolution = Vec<(OsiIdentifier, Vec<SymbologyEntry>)>;

/// Capability interface for a market-data vendor: resolve OSI identifiers
/// to provider instrument ids, and fetch consolidated best-bid-offer
/// history for a set of instrument ids over a time window.
pub trait QuoteProvider: Send + Sync {
    /// Resolves every OSI identifier known for `underlier` in `dataset` as
    /// of `valuation_date` to its provider instrument id history.
    fn resolve_symbology(
        &self,
        dataset: &str,
        underlier: &str,
        valuation_date: NaiveDate,
    ) -> Result<SymbologyResolution, ChainError>;

    /// Fetches CBBO messages for `ids` under `schema`, looking back `window`
    /// from `at` (the provider's lookahead of 2 seconds past `at` is a
    /// wire-protocol detail implementations apply internally).
    fn get_cbbo_range(
        &self,
        ids: &[String],
        dataset: &str,
        schema: Schema,
        at: Timestamp,
        window: TimeRange,
    ) -> Result<Vec<CbboMsg>, ChainError>;
}
