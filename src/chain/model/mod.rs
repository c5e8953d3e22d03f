//! The assembled option chain and the utility calculations (validity,
//! chain/expiry timing, discounting, put-call parity) that both the gap
//! filler and the cache consult.

pub mod option_chain;

pub use option_chain::OptionChain;
