//! Converts raw CBBO messages for a single expiry into a time-ordered
//! timeline of records per strike, then collapses that timeline into one
//! record per strike and reports which instruments never produced a usable
//! two-sided quote.

pub mod builder;
pub mod record;

pub use builder::SnapshotBuilder;
pub use record::{PriceWeight, Record};
