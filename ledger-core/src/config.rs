//! Configuration for the ledger

use crate::{AssetId, AssetInfo, AssetRegistry, AssetUsage};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Optimistic transaction retry policy
    #[serde(default)]
    pub transaction: TransactionConfig,

    /// Known assets
    #[serde(default)]
    pub assets: Vec<AssetInfo>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "ledger-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data/ledger"),
            transaction: TransactionConfig::default(),
            assets: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Backoff settings for retried transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// First retry delay (milliseconds)
    pub initial_interval_ms: u64,

    /// Delay cap (milliseconds)
    pub max_interval_ms: u64,

    /// Growth factor per retry
    pub multiplier: f64,

    /// Jitter as a fraction of the delay
    pub randomization_factor: f64,

    /// Give up after this much wall time (milliseconds)
    pub max_elapsed_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 5,
            max_interval_ms: 200,
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_elapsed_ms: 2_000,
        }
    }
}

impl TransactionConfig {
    /// Build the backoff policy for one transaction
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(Some(Duration::from_millis(self.max_elapsed_ms)))
            .build()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(filter) = std::env::var("LEDGER_LOG_FILTER") {
            config.logging.filter = filter;
        }

        if let Ok(json) = std::env::var("LEDGER_LOG_JSON") {
            config.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        if let Ok(ms) = std::env::var("LEDGER_TXN_MAX_ELAPSED_MS") {
            config.transaction.max_elapsed_ms = ms
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_TXN_MAX_ELAPSED_MS: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Asset registry built from the configured assets
    pub fn registry(&self) -> AssetRegistry {
        AssetRegistry::new(self.assets.iter().cloned())
    }

    fn validate(&self) -> crate::Result<()> {
        if self.transaction.multiplier < 1.0 {
            return Err(crate::Error::Config(format!(
                "transaction multiplier {} below 1",
                self.transaction.multiplier
            )));
        }
        for info in &self.assets {
            if !info.asset_id.is_plain() {
                return Err(crate::Error::Config(format!(
                    "configured asset {} is not plain",
                    info.asset_id
                )));
            }
            if info.usage.virtual_borrow && !info.usage.borrowable {
                return Err(crate::Error::Config(format!(
                    "asset {} is virtual but not borrowable",
                    info.asset_id
                )));
            }
        }
        Ok(())
    }
}

/// Asset definition shorthand for tests and tools
pub fn asset(id: &str, decimals: u32, is_currency: bool, usage: AssetUsage) -> crate::Result<AssetInfo> {
    Ok(AssetInfo {
        asset_id: AssetId::plain(id)?,
        decimals,
        is_currency,
        usage,
    })
}
