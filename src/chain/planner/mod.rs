//! Adaptive request planning: splits a lookback window into sub-requests
//! sized to stay under a provider record budget, retries on decoder
//! overflow by halving that budget, and chains a one-second pass into a
//! one-minute fallback for instruments still missing usable quotes.

pub mod request_planner;

pub use request_planner::RequestPlanner;
