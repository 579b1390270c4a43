//! Configuration
//!
//! Loaded once at startup from a TOML file. Section and key names follow
//! the operator-facing layout:
//!
//! ```toml
//! [strategy]
//! starting_asset = "USDT"
//! default_fee = 0.1
//! risk = 0.5
//! min_profit_ratio = 1.0001
//! live_mode = false
//!
//! [connection]
//! md_endpoint = "stream.example.com"
//! md_port = 9443
//! oe_endpoint = "api.example.com"
//! oe_port = 443
//! rest_endpoint = "api.example.com"
//! api_key = "..."
//! key_path = "/path/to/key.pem"
//!
//! [performance]
//! polling_mode = "hybrid"
//! busy_poll_spin_count = 10000
//!
//! [persistence]
//! trade_log_dir = "trades"
//!
//! [fees]
//! ETHBTC = 0.075
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Main-loop wait mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    /// Condvar wait (lower CPU, higher latency)
    Blocking,
    /// Spin with pause hints (higher CPU, lower latency)
    BusyPoll,
    /// Spin for the configured budget, then block
    Hybrid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub starting_asset: String,

    /// Taker fee percent applied unless overridden per symbol
    #[serde(default = "default_fee")]
    pub default_fee: f64,

    /// Fraction of the starting-asset balance staked, 0 < risk <= 1
    #[serde(default = "default_risk")]
    pub risk: f64,

    #[serde(default = "default_min_profit_ratio")]
    pub min_profit_ratio: f64,

    /// false = simulated fills, no orders reach the exchange
    #[serde(default)]
    pub live_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub md_endpoint: String,
    #[serde(default = "default_md_port")]
    pub md_port: u16,
    pub oe_endpoint: String,
    #[serde(default = "default_oe_port")]
    pub oe_port: u16,
    pub rest_endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_polling_mode")]
    pub polling_mode: PollingMode,
    #[serde(default = "default_spin_count")]
    pub busy_poll_spin_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_trade_log_dir")]
    pub trade_log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub strategy: StrategyConfig,
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Per-symbol fee percent overrides
    #[serde(default)]
    pub fees: HashMap<String, f64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            polling_mode: default_polling_mode(),
            busy_poll_spin_count: default_spin_count(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            trade_log_dir: default_trade_log_dir(),
        }
    }
}

fn default_fee() -> f64 {
    0.1
}

fn default_risk() -> f64 {
    1.0
}

fn default_min_profit_ratio() -> f64 {
    1.0001
}

fn default_md_port() -> u16 {
    9443
}

fn default_oe_port() -> u16 {
    443
}

fn default_polling_mode() -> PollingMode {
    PollingMode::Hybrid
}

fn default_spin_count() -> u32 {
    10_000
}

fn default_trade_log_dir() -> String {
    "trades".to_string()
}

impl Config {
    /// Load and validate configuration
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy.starting_asset.is_empty() {
            return Err(ConfigError::Invalid(
                "strategy.starting_asset must not be empty".to_string(),
            ));
        }
        if !(self.strategy.risk > 0.0 && self.strategy.risk <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "strategy.risk must be in (0, 1], got {}",
                self.strategy.risk
            )));
        }
        if self.strategy.min_profit_ratio <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "strategy.min_profit_ratio must be positive, got {}",
                self.strategy.min_profit_ratio
            )));
        }
        Ok(())
    }

    /// Market-data websocket URL
    pub fn md_url(&self) -> String {
        format!(
            "wss://{}:{}/ws",
            self.connection.md_endpoint, self.connection.md_port
        )
    }

    /// REST base URL
    pub fn rest_url(&self) -> String {
        format!("https://{}", self.connection.rest_endpoint)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
