//! Settings file and environment loading.
//!
//! Settings come from an optional TOML file (`PATCHBOT_CONFIG_FILE`, default
//! `patchbot.toml`) overlaid with `PATCHBOT`-prefixed environment variables
//! (`PATCHBOT__TRANSPORT__TOKEN`, double underscore as the section
//! separator). The deserialized [`Settings`] tree converts into the runtime
//! config types each module consumes.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::budget::{BudgetConfig, ModelPrice, PriceTable};
use crate::dedup::DedupConfig;
use crate::error::BotResult;
use crate::transport::{RetryPolicy, TransportConfig};

const CONFIG_FILE_ENV: &str = "PATCHBOT_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "patchbot.toml";

/// Deserialized settings tree, one section per module.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Webhook delivery dedup.
    #[serde(default)]
    pub dedup: DedupSettings,
    /// Outbound HTTP.
    #[serde(default)]
    pub transport: TransportSettings,
    /// Retry schedule.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Spend ceilings and prices.
    #[serde(default)]
    pub budget: BudgetSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupSettings {
    /// Entry time-to-live in seconds.
    #[serde(default = "DedupSettings::default_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum retained entries; absent means the built-in default, 0 means
    /// unbounded.
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl DedupSettings {
    fn default_ttl_secs() -> u64 {
        3600
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl_secs(),
            capacity: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    /// Code-host API base URL.
    #[serde(default = "TransportSettings::default_api_base")]
    pub api_base: String,
    /// API token; usually injected via environment.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "TransportSettings::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl TransportSettings {
    fn default_api_base() -> String {
        "https://api.github.com".to_string()
    }

    fn default_request_timeout_secs() -> u64 {
        30
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            token: None,
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Attempt ceiling including the first try.
    #[serde(default = "RetrySettings::default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "RetrySettings::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "RetrySettings::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetrySettings {
    fn default_max_attempts() -> u32 {
        4
    }

    fn default_initial_backoff_ms() -> u64 {
        500
    }

    fn default_max_backoff_ms() -> u64 {
        30_000
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    /// Per-run ceiling in cents (0 = unlimited).
    #[serde(default = "BudgetSettings::default_run_ceiling_cents")]
    pub run_ceiling_cents: f64,
    /// Daily ceiling in cents (0 = unlimited).
    #[serde(default = "BudgetSettings::default_daily_ceiling_cents")]
    pub daily_ceiling_cents: f64,
    /// Model name to price entry.
    #[serde(default)]
    pub prices: HashMap<String, PriceSettings>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PriceSettings {
    /// Cents per 1K input tokens.
    pub input_per_1k: f64,
    /// Cents per 1K output tokens.
    pub output_per_1k: f64,
}

impl BudgetSettings {
    fn default_run_ceiling_cents() -> f64 {
        50.0
    }

    fn default_daily_ceiling_cents() -> f64 {
        2000.0
    }
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            run_ceiling_cents: Self::default_run_ceiling_cents(),
            daily_ceiling_cents: Self::default_daily_ceiling_cents(),
            prices: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from the default file location and the environment.
    pub fn load() -> BotResult<Self> {
        let file = env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&file))
    }

    /// Load settings from a specific file path and the environment.
    ///
    /// A missing file is not an error; the defaults and environment overlay
    /// still apply.
    pub fn load_from(path: &Path) -> BotResult<Self> {
        let mut builder = config::Config::builder();
        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("PATCHBOT").separator("__"));

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Runtime dedup config.
    pub fn dedup_config(&self) -> DedupConfig {
        let mut config = DedupConfig::new().with_ttl(Duration::from_secs(self.dedup.ttl_secs));
        if let Some(capacity) = self.dedup.capacity {
            config = config.with_capacity(if capacity == 0 { None } else { Some(capacity) });
        }
        config
    }

    /// Runtime transport config.
    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new()
            .with_api_base(self.transport.api_base.clone())
            .with_request_timeout(Duration::from_secs(self.transport.request_timeout_secs));
        if let Some(token) = &self.transport.token {
            config = config.with_token(token.clone());
        }
        config
    }

    /// Runtime retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_initial_backoff(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.retry.max_backoff_ms))
    }

    /// Runtime budget config.
    pub fn budget_config(&self) -> BudgetConfig {
        let prices: PriceTable = self
            .budget
            .prices
            .iter()
            .map(|(model, price)| {
                (
                    model.clone(),
                    ModelPrice::new(price.input_per_1k, price.output_per_1k),
                )
            })
            .collect();
        BudgetConfig::new()
            .with_run_ceiling(self.budget.run_ceiling_cents)
            .with_daily_ceiling(self.budget.daily_ceiling_cents)
            .with_prices(prices)
    }
}
