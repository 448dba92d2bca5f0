//! Budget configuration and model pricing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-1000-token prices for one model, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Cost per 1K input tokens (cents).
    pub input_per_1k: f64,
    /// Cost per 1K output tokens (cents).
    pub output_per_1k: f64,
}

impl ModelPrice {
    /// Create a price entry.
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// The zero price used for models absent from the table.
    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Whether both components are finite and non-negative.
    pub fn is_valid(&self) -> bool {
        self.input_per_1k.is_finite()
            && self.output_per_1k.is_finite()
            && self.input_per_1k >= 0.0
            && self.output_per_1k >= 0.0
    }

    /// Cost in cents for the given token counts.
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        let input = (tokens_in as f64 / 1000.0) * self.input_per_1k;
        let output = (tokens_out as f64 / 1000.0) * self.output_per_1k;
        input + output
    }
}

/// Model name -> price table supplied at construction.
///
/// Models absent from the table are free: the bot may be configured with
/// self-hosted or flat-rate backends whose marginal cost is zero, and the
/// ledger should not block them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    models: HashMap<String, ModelPrice>,
}

impl PriceTable {
    /// Create an empty table (every model free).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a model's price.
    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.models.insert(model.into(), price);
        self
    }

    /// Price for a model; zero for unknown models.
    pub fn price(&self, model: &str) -> ModelPrice {
        self.models
            .get(model)
            .copied()
            .unwrap_or_else(ModelPrice::free)
    }

    /// Whether the model has an explicit entry.
    pub fn knows(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}

impl FromIterator<(String, ModelPrice)> for PriceTable {
    fn from_iter<I: IntoIterator<Item = (String, ModelPrice)>>(iter: I) -> Self {
        Self {
            models: iter.into_iter().collect(),
        }
    }
}

/// Ceilings and pricing for the budget ledger.
///
/// A ceiling of `0.0` disables that ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum spend per pipeline run, in cents (0 = unlimited).
    pub run_ceiling_cents: f64,

    /// Maximum spend per calendar day, in cents (0 = unlimited).
    pub daily_ceiling_cents: f64,

    /// Price table for the configured models.
    pub prices: PriceTable,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            run_ceiling_cents: 50.0,     // $0.50 per run
            daily_ceiling_cents: 2000.0, // $20.00 per day
            prices: PriceTable::new(),
        }
    }
}

impl BudgetConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unlimited config (no enforcement).
    pub fn unlimited() -> Self {
        Self {
            run_ceiling_cents: 0.0,
            daily_ceiling_cents: 0.0,
            prices: PriceTable::new(),
        }
    }

    /// Set the per-run ceiling in cents.
    pub fn with_run_ceiling(mut self, cents: f64) -> Self {
        self.run_ceiling_cents = cents;
        self
    }

    /// Set the daily ceiling in cents.
    pub fn with_daily_ceiling(mut self, cents: f64) -> Self {
        self.daily_ceiling_cents = cents;
        self
    }

    /// Set the price table.
    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    /// Whether any ceiling is active.
    pub fn is_enforced(&self) -> bool {
        self.run_ceiling_cents > 0.0 || self.daily_ceiling_cents > 0.0
    }
}
