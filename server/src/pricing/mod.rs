//! Per-model unit pricing.
//!
//! The table is loaded once before the server starts accepting traffic and
//! is read-only afterwards, so it is shared without locking. Rows come from
//! a comma-separated text resource: the embedded default table, or the file
//! named by `PRICING_TABLE_PATH`.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};

/// Embedded default pricing table.
const DEFAULT_TABLE: &str = include_str!("model_prices.csv");

/// The mode used when a span does not specify one.
pub const MODE_STANDARD: &str = "standard";

/// Fallback row used when no exact `(provider, model, mode)` match exists.
const FALLBACK_PROVIDER: &str = "openai";
const FALLBACK_MODEL: &str = "gpt-4o";
const FALLBACK_RATES: UnitRates = UnitRates {
    input_per_m: 2.50,
    cached_input_per_m: 1.25,
    output_per_m: 10.00,
};

/// USD prices per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitRates {
    pub input_per_m: f64,
    pub cached_input_per_m: f64,
    pub output_per_m: f64,
}

/// Outcome of a rate lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLookup {
    pub rates: UnitRates,
    /// `<provider>-<model>-<mode>` of the row that actually priced the span.
    pub calculator: String,
    /// True when the hard-coded fallback row was substituted.
    pub fallback: bool,
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("failed to read pricing table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("pricing table has no usable rows")]
    Empty,
}

/// In-memory pricing lookup, keyed by case-sensitive `(provider, model, mode)`.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rows: HashMap<(String, String, String), UnitRates>,
    /// Reverse `model -> provider` index for provider inference; the first
    /// row mentioning a model wins.
    model_providers: HashMap<String, String>,
}

impl PricingTable {
    /// Load from the file at `path`, or the embedded default table when no
    /// path is configured.
    pub fn load(path: Option<&str>) -> Result<Self, PricingError> {
        let table = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| PricingError::Io {
                    path: p.to_owned(),
                    source,
                })?;
                let table = Self::parse(&text)?;
                info!(path = %p, models = table.rows.len(), "Pricing table loaded");
                table
            }
            None => {
                let table = Self::parse(DEFAULT_TABLE)?;
                info!(models = table.rows.len(), "Embedded pricing table loaded");
                table
            }
        };
        Ok(table)
    }

    /// Parse CSV text: header row starts with `provider`, empty lines are
    /// ignored, malformed rows are skipped with a warning.
    pub fn parse(text: &str) -> Result<Self, PricingError> {
        let mut rows = HashMap::new();
        let mut model_providers: HashMap<String, String> = HashMap::new();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("provider") {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 6 {
                warn!(line = line_no + 1, "Skipping short pricing row");
                continue;
            }
            let (provider, model, mode) = (fields[0], fields[1], fields[2]);
            let parsed: Option<Vec<f64>> = fields[3..6]
                .iter()
                .map(|f| f.parse::<f64>().ok())
                .collect();
            let Some(prices) = parsed else {
                warn!(line = line_no + 1, "Skipping unparseable pricing row");
                continue;
            };
            let mode = if mode.is_empty() { MODE_STANDARD } else { mode };
            rows.insert(
                (provider.to_owned(), model.to_owned(), mode.to_owned()),
                UnitRates {
                    input_per_m: prices[0],
                    cached_input_per_m: prices[1],
                    output_per_m: prices[2],
                },
            );
            model_providers
                .entry(model.to_owned())
                .or_insert_with(|| provider.to_owned());
        }

        if rows.is_empty() {
            return Err(PricingError::Empty);
        }
        Ok(Self {
            rows,
            model_providers,
        })
    }

    /// Exact match first; on a miss, the tagged fallback row.
    #[must_use]
    pub fn lookup(&self, provider: &str, model: &str, mode: &str) -> RateLookup {
        let key = (provider.to_owned(), model.to_owned(), mode.to_owned());
        if let Some(rates) = self.rows.get(&key) {
            return RateLookup {
                rates: *rates,
                calculator: format!("{provider}-{model}-{mode}"),
                fallback: false,
            };
        }
        RateLookup {
            rates: FALLBACK_RATES,
            calculator: format!("{FALLBACK_PROVIDER}-{FALLBACK_MODEL}-{MODE_STANDARD}"),
            fallback: true,
        }
    }

    /// Provider that lists `model` in the table, if any.
    #[must_use]
    pub fn provider_for_model(&self, model: &str) -> Option<&str> {
        self.model_providers.get(model).map(String::as_str)
    }
}
