/*
[INPUT]:  Optional YAML file plus GDAX_TICKER__* environment overrides
[OUTPUT]: Validated feed configuration
[POS]:    Configuration layer - feed setup
[UPDATE]: When adding new configuration options
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use url::Url;

use gdax_ticker_adapter::{Currency, DEFAULT_FEED_URL};

use crate::catalog::ProductCatalog;

const ENV_PREFIX: &str = "GDAX_TICKER";
const ENV_SEPARATOR: &str = "__";

/// Top-level configuration for the ticker feed
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket endpoint of the public feed
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    /// No frame within this window counts as a transport fault
    pub liveness_timeout_secs: u64,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    /// Trading pairs offered to the user
    pub products: Vec<ProductConfig>,
    /// Settings file; defaults to the platform data directory
    pub settings_path: Option<PathBuf>,
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Price dispatch queue configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    /// Wait before retrying an update whose product is not confirmed yet
    pub requeue_delay_ms: u64,
    pub max_requeue_attempts: u32,
}

/// A trading pair by ticker symbols, e.g. `{ base: BTC, target: USD }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProductConfig {
    pub base: String,
    pub target: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_FEED_URL.to_string(),
            connect_timeout_secs: 10,
            liveness_timeout_secs: 30,
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            products: default_products(),
            settings_path: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 120_000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            requeue_delay_ms: 500,
            max_requeue_attempts: 10,
        }
    }
}

fn default_products() -> Vec<ProductConfig> {
    [Currency::Btc, Currency::Eth, Currency::Ltc, Currency::Bch]
        .into_iter()
        .map(|base| ProductConfig::new(base, Currency::Usd))
        .collect()
}

impl ProductConfig {
    pub fn new(base: Currency, target: Currency) -> Self {
        Self {
            base: base.ticker_symbol().to_string(),
            target: target.ticker_symbol().to_string(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl DispatchConfig {
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }
}

impl FeedConfig {
    /// Layer an optional YAML file and `GDAX_TICKER__*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let layered = builder.build().context("failed to read configuration")?;
        let config: Self = layered
            .try_deserialize()
            .context("failed to parse configuration")?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.endpoint)
            .with_context(|| format!("invalid endpoint '{}'", self.endpoint))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("endpoint must use ws or wss, got '{}'", url.scheme());
        }
        if self.connect_timeout_secs == 0 || self.liveness_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.dispatch.queue_capacity == 0 {
            bail!("dispatch.queue_capacity must be greater than zero");
        }
        if self.retry.initial_delay_ms == 0 {
            bail!("retry.initial_delay_ms must be greater than zero");
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            bail!(
                "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
                self.retry.max_delay_ms,
                self.retry.initial_delay_ms
            );
        }
        ProductCatalog::from_config(&self.products)?;
        Ok(())
    }
}
