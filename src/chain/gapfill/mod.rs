//! Put-call-parity based gap repair: fits a spread model and a parity
//! curve from the valid records in a chain, then fills missing or
//! one-sided strikes from those fits, tagging every filled field with its
//! provenance.

pub mod gap_filler;
pub mod lsfit;

pub use gap_filler::{GapFillResult, GapFiller};
