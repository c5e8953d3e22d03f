//! Wire-level types returned by a [`super::QuoteProvider`]: the CBBO
//! schema selector, a single consolidated best-bid-offer message, and a
//! symbology resolution entry.
//!
//! Grounded on the provider surface implied by spec.md §4.4 (`CbboMsg`,
//! `Schema::{OneSecond, OneMinute}`) — the wire protocol and decoder that
//! would produce these values are out of scope; only the shapes are.

use chrono::NaiveDate;

use crate::chain::symbology::model::InstrumentId;
use crate::chain::types::Timestamp;

/// CBBO aggregation interval requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    OneSecond,
    OneMinute,
}

impl Schema {
    /// Nominal duration of one bar under this schema, used by the planner
    /// to estimate how many records a sub-window will produce.
    pub fn unit(self) -> crate::chain::types::TimeRange {
        match self {
            Schema::OneSecond => crate::chain::types::TimeRange::from_micros_unchecked(1_000_000),
            Schema::OneMinute => crate::chain::types::TimeRange::from_micros_unchecked(60_000_000),
        }
    }
}

/// One consolidated best-bid-offer message for a single instrument.
///
/// Prices are carried as `f64` dollars at this layer — the original wire
/// format scales fixed-point prices by `1e9`; that descaling is assumed to
/// have already happened by the time a `QuoteProvider` implementation hands
/// a `CbboMsg` to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CbboMsg {
    pub instrument_id: InstrumentId,
    pub ts_event: Timestamp,
    pub ts_recv: Timestamp,
    pub trade_price: f64,
    pub trade_size: u32,
    pub bid_price: f64,
    pub bid_size: u32,
    pub ask_price: f64,
    pub ask_size: u32,
}

/// A single validity window for an OSI identifier's mapping to a provider
/// instrument id, as returned by `resolve_symbology`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbologyEntry {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub instrument_id: InstrumentId,
}
