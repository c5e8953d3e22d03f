//! Per-symbol in-memory store of built chains, with a lenient nearest-key
//! lookup tolerant of the valuation instant not landing exactly on a
//! recorded chain time.

pub mod chain_cache;

pub use chain_cache::ChainCache;
