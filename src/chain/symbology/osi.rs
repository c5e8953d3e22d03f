//! Option Symbology Initiative identifiers and the canonical strike key
//! derived from them.
//!
//! Grounded on the original `OsiOption`: a 21-character fixed-width code
//! (6-character underlier padded with spaces, 6-digit `YYMMDD` expiry, a
//! single `C`/`P` type character, and an 8-digit strike made of 5 whole
//! dollars digits followed by 3 decimal digits, i.e. thousandths of a
//! dollar), plus `toStrikeKey`/`fromStrikeKey` conversions between that
//! 8-digit strike field and a floating point price.

use chrono::NaiveDate;
use std::fmt;

use crate::chain::error::ChainError;

/// Put or call, the single type character of an OSI identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    fn as_char(self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }

    fn from_char(c: char) -> Result<Self, ChainError> {
        match c {
            'C' => Ok(OptionType::Call),
            'P' => Ok(OptionType::Put),
            other => Err(ChainError::DataShapeAnomaly(format!(
                "OSI identifier has invalid option type character '{other}'"
            ))),
        }
    }
}

/// The canonical 8-digit strike representation used to key `InstrumentTable`
/// maps: `DDDDDFFF`, five digits of whole dollars followed by three digits
/// of thousandths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StrikeKey(u32);

impl StrikeKey {
    /// Builds a strike key directly from its 8-digit integer form.
    pub fn from_raw(raw: u32) -> Self {
        StrikeKey(raw)
    }

    /// Converts a strike price in dollars into its canonical 8-digit key,
    /// rounding to the nearest thousandth.
    pub fn from_price(price: f64) -> Self {
        let scaled = (price * 1000.0).round();
        StrikeKey(scaled.max(0.0) as u32)
    }

    /// Recovers the strike price in dollars: `dollars + thousandths / 1000`.
    pub fn price(self) -> f64 {
        f64::from(self.0) / 1000.0
    }

    /// The raw 8-digit integer key.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Renders the key as the zero-padded 8-digit string embedded in an OSI
    /// identifier.
    pub fn to_osi_field(self) -> String {
        format!("{:08}", self.0)
    }

    /// Parses the 8-digit strike field of an OSI identifier.
    pub fn from_osi_field(field: &str) -> Result<Self, ChainError> {
        if field.len() != 8 || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ChainError::DataShapeAnomaly(format!(
                "OSI strike field '{field}' is not 8 decimal digits"
            )));
        }
        field
            .parse::<u32>()
            .map(StrikeKey)
            .map_err(|e| ChainError::DataShapeAnomaly(format!("OSI strike field '{field}': {e}")))
    }
}

impl fmt::Display for StrikeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.price())
    }
}

impl StrikeKey {
    /// Renders the strike the way the CSV sink's `Strike` column does: whole
    /// dollars with no leading zeros, decimals only when non-zero and with
    /// trailing zeros trimmed (`375.000` -> `"375"`, `28.500` -> `"28.5"`).
    pub fn to_display_string(self) -> String {
        let dollars = self.0 / 1000;
        let thousandths = self.0 % 1000;
        if thousandths == 0 {
            dollars.to_string()
        } else {
            let decimal = format!("{thousandths:03}");
            let trimmed = decimal.trim_end_matches('0');
            format!("{dollars}.{trimmed}")
        }
    }
}

/// A parsed OSI option identifier: underlier, expiry, type and strike.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OsiIdentifier {
    underlier: String,
    expiry_date: NaiveDate,
    option_type: OptionType,
    strike: StrikeKey,
}

const UNDERLIER_FIELD_WIDTH: usize = 6;

impl OsiIdentifier {
    pub fn new(underlier: &str, expiry_date: NaiveDate, option_type: OptionType, strike: StrikeKey) -> Self {
        Self {
            underlier: underlier.trim().to_uppercase(),
            expiry_date,
            option_type,
            strike,
        }
    }

    pub fn underlier(&self) -> &str {
        &self.underlier
    }

    pub fn expiry_date(&self) -> NaiveDate {
        self.expiry_date
    }

    pub fn option_type(&self) -> OptionType {
        self.option_type
    }

    pub fn is_call(&self) -> bool {
        matches!(self.option_type, OptionType::Call)
    }

    pub fn is_put(&self) -> bool {
        matches!(self.option_type, OptionType::Put)
    }

    pub fn strike(&self) -> StrikeKey {
        self.strike
    }

    /// Renders the fixed-width 21-character OSI code.
    pub fn to_osi_code(&self) -> String {
        format!(
            "{:<width$}{}{}{}",
            self.underlier,
            self.expiry_date.format("%y%m%d"),
            self.option_type.as_char(),
            self.strike.to_osi_field(),
            width = UNDERLIER_FIELD_WIDTH,
        )
    }

    /// Parses a 21-character OSI code into its constituent fields.
    pub fn parse(code: &str) -> Result<Self, ChainError> {
        if code.len() != 21 {
            return Err(ChainError::DataShapeAnomaly(format!(
                "OSI identifier '{code}' is not 21 characters"
            )));
        }
        let underlier = code[0..6].trim().to_string();
        let expiry_date = NaiveDate::parse_from_str(&code[6..12], "%y%m%d").map_err(|e| {
            ChainError::DataShapeAnomaly(format!("OSI identifier '{code}' has invalid expiry: {e}"))
        })?;
        let option_type = OptionType::from_char(code.as_bytes()[12] as char)?;
        let strike = StrikeKey::from_osi_field(&code[13..21])?;
        Ok(Self {
            underlier,
            expiry_date,
            option_type,
            strike,
        })
    }
}

impl fmt::Display for OsiIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_osi_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_key_round_trips_through_price() {
        let key = StrikeKey::from_price(123.45);
        assert_eq!(key.raw(), 123_450);
        assert_eq!(key.to_osi_field(), "00123450");
        assert!((key.price() - 123.45).abs() < 1e-9);
    }

    #[test]
    fn strike_key_round_trips_through_osi_field() {
        let key = StrikeKey::from_osi_field("00045000").unwrap();
        assert_eq!(key.price(), 45.0);
        assert_eq!(key.to_osi_field(), "00045000");
    }

    #[test]
    fn osi_identifier_round_trips_through_code() {
        let id = OsiIdentifier::new(
            "SPY",
            NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(),
            OptionType::Call,
            StrikeKey::from_price(450.0),
        );
        let code = id.to_osi_code();
        assert_eq!(code.len(), 21);
        assert_eq!(code, "SPY   240621C00450000");
        let parsed = OsiIdentifier::parse(&code).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(OsiIdentifier::parse("SPY240621C00450000").is_err());
    }

    #[test]
    fn parse_rejects_invalid_option_type() {
        let bad = "SPY   240621X00450000";
        assert!(OsiIdentifier::parse(bad).is_err());
    }

    #[test]
    fn display_string_trims_trailing_decimal_zeros() {
        assert_eq!(StrikeKey::from_price(375.0).to_display_string(), "375");
        assert_eq!(StrikeKey::from_price(28.5).to_display_string(), "28.5");
        assert_eq!(StrikeKey::from_price(28.05).to_display_string(), "28.05");
    }
}
