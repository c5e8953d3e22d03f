//! Per-(underlier, valuation date, expiry date) instrument tables, built
//! once from a provider's symbology resolution and cached behind a mutex.
//!
//! Grounded on the original `OptionInstruments`: a table keyed by strike,
//! separately for puts and calls, mapping each strike to the OSI identifier
//! and provider instrument id active on the valuation date.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use crate::chain::error::ChainError;
use crate::chain::provider::QuoteProvider;
use crate::chain::symbology::osi::{OptionType, OsiIdentifier, StrikeKey};

/// Provider-assigned instrument identifier.
pub type InstrumentId = String;

/// Puts and calls for a single (underlier, expiry date), keyed by strike.
#[derive(Debug, Clone, Default)]
pub struct InstrumentTable {
    pub underlier: String,
    pub expiry_date: NaiveDate,
    pub puts: HashMap<StrikeKey, (OsiIdentifier, InstrumentId)>,
    pub calls: HashMap<StrikeKey, (OsiIdentifier, InstrumentId)>,
}

impl InstrumentTable {
    /// All instrument ids across both sides, in no particular order.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        self.puts
            .values()
            .chain(self.calls.values())
            .map(|(_, id)| id.clone())
            .collect()
    }
}

struct CacheKey {
    underlier: String,
    valuation_date: NaiveDate,
    expiry_date: NaiveDate,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.underlier == other.underlier
            && self.valuation_date == other.valuation_date
            && self.expiry_date == other.expiry_date
    }
}

/// Resolves and caches [`InstrumentTable`]s for a `QuoteProvider`.
///
/// All reads and writes go through a single mutex, matching the original's
/// note that symbology tables are guarded the same way the option-chain
/// cache is: simple, not fine-grained, because resolution is infrequent
/// relative to timeseries requests.
pub struct SymbologyModel {
    dataset: String,
    entries: Mutex<Vec<(CacheKey, InstrumentTable)>>,
}

impl SymbologyModel {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Returns the cached table for `(underlier, valuation_date, expiry_date)`,
    /// resolving it from `provider` on first request.
    pub fn instrument_table(
        &self,
        provider: &dyn QuoteProvider,
        underlier: &str,
        valuation_date: NaiveDate,
        expiry_date: NaiveDate,
    ) -> Result<InstrumentTable, ChainError> {
        let key = CacheKey {
            underlier: underlier.to_string(),
            valuation_date,
            expiry_date,
        };

        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((_, table)) = entries.iter().find(|(k, _)| *k == key) {
            return Ok(table.clone());
        }

        let resolution = provider.resolve_symbology(&self.dataset, underlier, valuation_date)?;
        let mut table = InstrumentTable {
            underlier: underlier.to_string(),
            expiry_date,
            puts: HashMap::new(),
            calls: HashMap::new(),
        };
        for (osi, mappings) in resolution {
            if osi.expiry_date() != expiry_date || osi.underlier() != underlier {
                continue;
            }
            let active = mappings
                .iter()
                .find(|entry| entry.start_date <= valuation_date && valuation_date <= entry.end_date);
            let Some(active) = active else {
                continue;
            };
            let slot = match osi.option_type() {
                OptionType::Put => &mut table.puts,
                OptionType::Call => &mut table.calls,
            };
            slot.insert(osi.strike(), (osi.clone(), active.instrument_id.clone()));
        }

        entries.push((key, table.clone()));
        Ok(table)
    }

    /// Enumerates the distinct OSI expiry dates for `underlier` within
    /// `[date, date + dte days]`. If the window would otherwise yield only
    /// the 0-DTE expiry (`date` itself), the next expiry beyond the window
    /// is substituted instead, so a single-day window around a quarterly
    /// expiry still produces a usable chain date.
    ///
    /// Grounded on `RequesterSynchronous::getOptionChains`'s substitution of
    /// `getNextExpiryDate` when `getExpiryDatesForDTE` returns only `{date}`.
    pub fn expiries_within_dte(
        &self,
        provider: &dyn QuoteProvider,
        underlier: &str,
        date: NaiveDate,
        dte: u32,
    ) -> Result<Vec<NaiveDate>, ChainError> {
        let resolution = provider.resolve_symbology(&self.dataset, underlier, date)?;
        let window_end = date + chrono::Duration::days(i64::from(dte));

        let mut expiries: std::collections::BTreeSet<NaiveDate> = resolution
            .iter()
            .map(|(osi, _)| osi.expiry_date())
            .filter(|&expiry| expiry >= date && expiry <= window_end)
            .collect();

        if expiries.is_empty() || (expiries.len() == 1 && expiries.contains(&date)) {
            let next = resolution
                .iter()
                .map(|(osi, _)| osi.expiry_date())
                .filter(|&expiry| expiry > window_end)
                .min();
            if let Some(next) = next {
                expiries.insert(next);
            }
        }

        Ok(expiries.into_iter().collect())
    }
}
