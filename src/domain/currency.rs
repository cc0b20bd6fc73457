//! Currency rate table and dollar-price derivation.
//!
//! Rates are read from a `rates.json` file living next to the data
//! directory and map a currency code to its value in US dollars. The
//! listing filter compares ads by dollar price, so every ad carries a
//! derived `dollar_price` recomputed on mutation and on rate refresh.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const RATES_FILE: &str = "rates.json";

#[derive(Debug, Error)]
pub enum RateError {
    #[error("failed to read rate file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse rate file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Currency-code → USD-per-unit table.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct RateTable {
    rates: HashMap<String, f64>,
}

impl RateTable {
    /// Built-in fallback used when no rate file is available.
    pub fn builtin() -> Self {
        let rates = [
            ("USD", 1.0),
            ("EUR", 1.09),
            ("GBP", 1.27),
            ("RUB", 0.011),
            ("UAH", 0.024),
        ]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect();
        Self { rates }
    }

    pub fn load(path: &Path) -> Result<Self, RateError> {
        let raw = std::fs::read(path)?;
        let mut table: RateTable = serde_json::from_slice(&raw)?;
        // The dollar is the unit everything is normalised to.
        table.rates.entry("USD".to_string()).or_insert(1.0);
        info!(
            target = "vetrina::currency",
            path = %path.display(),
            currencies = table.rates.len(),
            "Loaded currency rates"
        );
        Ok(table)
    }

    /// USD-per-unit rate for `code`; unknown currencies rate as zero so
    /// their ads sink to the bottom of price-filtered listings instead
    /// of surfacing with a bogus price.
    pub fn usd_rate(&self, code: &str) -> f64 {
        self.rates.get(code).copied().unwrap_or(0.0)
    }

    pub fn dollar_price(&self, price: f64, code: &str) -> f64 {
        price * self.usd_rate(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_normalises_usd_to_itself() {
        let table = RateTable::builtin();
        assert_eq!(table.dollar_price(250.0, "USD"), 250.0);
    }

    #[test]
    fn unknown_currency_rates_zero() {
        let table = RateTable::builtin();
        assert_eq!(table.dollar_price(100.0, "XXX"), 0.0);
    }

    #[test]
    fn load_parses_flat_map_and_inserts_usd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(RATES_FILE);
        std::fs::write(&path, r#"{"EUR": 1.1, "GBP": 1.3}"#).expect("write rates");
        let table = RateTable::load(&path).expect("load");
        assert_eq!(table.usd_rate("EUR"), 1.1);
        assert_eq!(table.usd_rate("USD"), 1.0);
    }
}
