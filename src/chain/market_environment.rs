//! Per-underlier market data needed to discount and time-bound an option
//! chain: a risk-free/forward rate curve and the underlier's exchange close.
//!
//! Grounded on the original's abstract `MarketEnvironment` (and the
//! `MarketEnvironmentExtended` subclass that layers a yield curve on top,
//! itself out of scope — only the trait is): immutable and shared via
//! `Arc` rather than locked, since rate lookups never mutate state.

use chrono_tz::Tz;

use crate::chain::error::ChainError;

/// Exchange close time of day, interpreted in an IANA timezone so daylight
/// saving transitions are handled correctly when composed with an expiry
/// date into a UTC instant.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeClose {
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
}

/// Abstract source of discounting and exchange-hours information for a
/// single underlier. Implementations are expected to be cheap to call and
/// safe to share across threads without their own locking — the pipeline
/// never mutates a `MarketEnvironment` once registered.
pub trait MarketEnvironment: Send + Sync {
    /// Annualized risk-free (or forward) rate applicable between
    /// `valuation_date` and `expiry_date`, expressed as a decimal (0.05 =
    /// 5%).
    fn rate(&self, valuation_date: chrono::NaiveDate, expiry_date: chrono::NaiveDate) -> Result<f64, ChainError>;

    /// The underlier's exchange close, used to turn an expiry date into a
    /// concrete UTC instant.
    fn exchange_close(&self) -> ExchangeClose;
}

/// A flat-rate `MarketEnvironment` with a fixed exchange close, sufficient
/// for underliers with no registered yield curve.
pub struct FlatRateEnvironment {
    rate: f64,
    exchange_close: ExchangeClose,
}

impl FlatRateEnvironment {
    pub fn new(rate: f64, exchange_close: ExchangeClose) -> Self {
        Self { rate, exchange_close }
    }
}

impl MarketEnvironment for FlatRateEnvironment {
    fn rate(&self, _valuation_date: chrono::NaiveDate, _expiry_date: chrono::NaiveDate) -> Result<f64, ChainError> {
        Ok(self.rate)
    }

    fn exchange_close(&self) -> ExchangeClose {
        self.exchange_close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn flat_rate_environment_returns_constant_rate() {
        let env = FlatRateEnvironment::new(
            0.05,
            ExchangeClose {
                hour: 16,
                minute: 0,
                timezone: chrono_tz::America::New_York,
            },
        );
        let rate = env
            .rate(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(),
            )
            .unwrap();
        assert_eq!(rate, 0.05);
    }
}
