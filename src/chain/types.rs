//! Concrete representations of the two primitive time types used
//! throughout the pipeline: an instant (`Timestamp`) and a duration
//! (`TimeRange`), kept distinct so the two units (nanoseconds vs.
//! microseconds) are never silently mixed.

use std::fmt;
use std::ops::{Add, Div, Sub};

use chrono::{DateTime, Utc};

use crate::chain::error::ChainError;

/// An instant in time, nanoseconds since the Unix epoch, UTC.
///
/// Timezone conversion is applied only when formatting output (CSV sink,
/// exchange-close composition); internally every timestamp is a plain UTC
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn to_utc_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }

    pub fn from_utc_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub fn saturating_sub(self, range: TimeRange) -> Self {
        Timestamp(self.0.saturating_sub(range.as_nanos()))
    }

    pub fn saturating_add(self, range: TimeRange) -> Self {
        Timestamp(self.0.saturating_add(range.as_nanos()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_utc_datetime().to_rfc3339())
    }
}

impl Sub for Timestamp {
    type Output = TimeRange;

    fn sub(self, rhs: Timestamp) -> TimeRange {
        TimeRange((self.0 - rhs.0) / 1_000)
    }
}

/// A non-negative duration, microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeRange(i64);

impl TimeRange {
    /// Fallible constructor for untrusted input; rejects negative durations.
    pub fn new(micros: i64) -> Result<Self, ChainError> {
        if micros < 0 {
            return Err(ChainError::Internal(format!(
                "TimeRange cannot be negative, got {micros} microseconds"
            )));
        }
        Ok(TimeRange(micros))
    }

    /// Constructs from a literal known to be non-negative at the call site.
    pub fn from_micros_unchecked(micros: i64) -> Self {
        debug_assert!(micros >= 0, "TimeRange must be non-negative");
        TimeRange(micros.max(0))
    }

    pub fn zero() -> Self {
        TimeRange(0)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_nanos(self) -> i64 {
        self.0 * 1_000
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for TimeRange {
    type Output = TimeRange;

    fn add(self, rhs: TimeRange) -> TimeRange {
        TimeRange(self.0 + rhs.0)
    }
}

impl Sub for TimeRange {
    type Output = TimeRange;

    fn sub(self, rhs: TimeRange) -> TimeRange {
        TimeRange((self.0 - rhs.0).max(0))
    }
}

impl Div<i64> for TimeRange {
    type Output = TimeRange;

    fn div(self, rhs: i64) -> TimeRange {
        TimeRange(self.0 / rhs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_rejects_negative_values() {
        assert!(TimeRange::new(-1).is_err());
        assert!(TimeRange::new(0).is_ok());
    }

    #[test]
    fn timestamp_difference_is_microsecond_time_range() {
        let a = Timestamp::from_nanos(5_000_000);
        let b = Timestamp::from_nanos(2_000_000);
        assert_eq!((a - b).as_micros(), 3_000);
    }

    #[test]
    fn time_range_splits_evenly() {
        let window = TimeRange::from_micros_unchecked(900);
        assert_eq!((window / 3).as_micros(), 300);
    }
}
