//! Tabular output for a gap-filled [`crate::chain::model::OptionChain`]:
//! the CSV sink and its pluggable output-stream abstraction.

pub mod csv_sink;

pub use csv_sink::{CsvSink, FileOutputter, Outputter};
