//! OSI-style option identifiers and the per-(underlier, expiry) instrument
//! table that maps them to provider instrument ids.

pub mod model;
pub mod osi;

pub use model::{InstrumentTable, SymbologyModel};
pub use osi::{OptionType, OsiIdentifier, StrikeKey};
