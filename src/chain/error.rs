//! Crate-wide error type for the option-chain pipeline.
//!
//! Mirrors the five failure kinds the pipeline distinguishes: transient
//! network errors are retried by [`crate::chain::pool::retry::Retry`] and
//! [`crate::chain::pool::retry::DelayedRetry`], decoder overflows are never
//! retried at the call site (the planner instead halves its record budget
//! and re-plans), authentication/config errors are fatal to the chain they
//! occur in, data-shape anomalies are logged and skipped, and gap-fill
//! sub-failures degrade a chain to a partial result rather than failing it.

use thiserror::Error;

/// Errors produced anywhere in the option-chain retrieval and repair pipeline.
#[derive(Error, Debug)]
pub enum ChainError {
    /// A network or upstream-service error that is expected to be transient
    /// (timeouts, connection resets, HTTP 5xx). Safe to retry.
    #[error("transient request failure: {0}")]
    Transient(String),

    /// The provider's wire decoder ran out of buffer space for the requested
    /// window. Never retried as-is; the caller (`RequestPlanner`) must shrink
    /// its per-request record budget and resubmit a smaller sub-window.
    #[error("decoder buffer overflow: {0}")]
    DecoderOverflow(String),

    /// Invalid credentials, missing configuration, or a malformed request
    /// that no amount of retrying will fix.
    #[error("authentication or configuration error: {0}")]
    Authentication(String),

    /// The provider returned data that doesn't match the shape the pipeline
    /// expects (unexpected instrument, malformed record). Logged and the
    /// offending item is skipped rather than failing the whole request.
    #[error("unexpected data shape: {0}")]
    DataShapeAnomaly(String),

    /// A specific step of gap repair (spread fit, parity fit, ATM estimate,
    /// interior/tail fit) could not produce a result. The chain is kept with
    /// whatever gap-filling succeeded up to that point.
    #[error("gap-fill step failed: {0}")]
    GapFillFailure(String),

    /// Requested object (chain, instrument, expiry) does not exist in the
    /// cache or instrument table.
    #[error("not found: {0}")]
    NotFound(String),

    /// Everything else: pool-internal invariants, I/O on the sink, anything
    /// that indicates a bug rather than an expected runtime condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChainError {
    /// The §4.3 no-retry classifier: only a decoder buffer overflow is
    /// excluded from `Retry`/`DelayedRetry`'s resubmission loop. Every other
    /// kind is eligible for a bounded number of retries.
    pub fn no_retry(&self) -> bool {
        matches!(self, ChainError::DecoderOverflow(_))
    }
}

impl From<&str> for ChainError {
    fn from(message: &str) -> Self {
        ChainError::Internal(message.to_string())
    }
}
