//! Configuration management for the premium gap farmer.
//!
//! Application settings load from an optional config file plus `PGF__`
//! environment variables. Per-instance strategy settings arrive from the CLI,
//! the HTTP control surface, or a multi-asset file (see [`multi_asset`]).

mod multi_asset;

pub use multi_asset::MultiAssetFile;

use crate::exchange::QuoteVariant;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binance futures REST settings
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Premium signal feed settings
    #[serde(default)]
    pub feed: FeedConfig,
    /// Defaults applied to every strategy instance
    #[serde(default)]
    pub defaults: StrategyDefaults,
    /// HTTP control surface
    #[serde(default)]
    pub server: ServerConfig,
    /// Encrypted configuration store
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// Futures REST endpoint (including the `/fapi` prefix is not required)
    #[serde(default = "default_binance_base_url")]
    pub base_url: String,
    /// recvWindow sent with position queries, in milliseconds
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// URL returning the per-symbol premium snapshots
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// What happens to `remaining` when a batch submission fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderFailurePolicy {
    /// Count the attempt as filled and decrement anyway.
    #[default]
    Consume,
    /// Leave `remaining` and progress untouched so the next tick retries.
    Retain,
}

/// Defaults applied once when a strategy instance is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefaults {
    /// Maximum mark-price gap for hedge entries
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: Decimal,
    /// Minimum mark-price gap for arbitrage entries (overrides the instance's)
    #[serde(default = "default_arbitrage_gap_threshold")]
    pub arbitrage_gap_threshold: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Minutes before funding settlement in which a reversal may commit (0 = anytime)
    #[serde(default = "default_funding_window_minutes")]
    pub funding_window_minutes: u32,
    /// Minimum annualized yield estimate for a reversal
    #[serde(default)]
    pub min_yield: Decimal,
    #[serde(default)]
    pub failure_policy: OrderFailurePolicy,
    /// Pacer period in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Secret the AES key is derived from
    #[serde(default)]
    pub secret: String,
}

// Default value functions
fn default_binance_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_http_timeout() -> u64 {
    30
}

fn default_feed_url() -> String {
    "https://wiwisorich.capslock.tw".to_string()
}

fn default_gap_threshold() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_arbitrage_gap_threshold() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_leverage() -> u32 {
    10
}

fn default_funding_window_minutes() -> u32 {
    60
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_path() -> String {
    "data/states.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PGF"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.defaults.leverage >= 1,
            "defaults.leverage must be >= 1"
        );

        anyhow::ensure!(
            self.defaults.gap_threshold >= Decimal::ZERO
                && self.defaults.arbitrage_gap_threshold >= Decimal::ZERO,
            "gap thresholds must not be negative"
        );

        anyhow::ensure!(
            self.defaults.tick_interval_ms > 0,
            "defaults.tick_interval_ms must be > 0"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance: BinanceConfig::default(),
            feed: FeedConfig::default(),
            defaults: StrategyDefaults::default(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_binance_base_url(),
            recv_window_ms: default_recv_window(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            gap_threshold: default_gap_threshold(),
            arbitrage_gap_threshold: default_arbitrage_gap_threshold(),
            leverage: default_leverage(),
            funding_window_minutes: default_funding_window_minutes(),
            min_yield: Decimal::ZERO,
            failure_policy: OrderFailurePolicy::default(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl StrategyDefaults {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            secret: String::new(),
        }
    }
}

// ==================== Strategy Instance ====================

/// API credentials for one account.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// First five characters of the key, for log correlation.
    pub fn key_hint(&self) -> &str {
        self.api_key.get(..5).unwrap_or("")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.key_hint())
            .field("api_secret", &"***")
            .finish()
    }
}

/// Settings of one running strategy instance.
///
/// Field names follow the control-surface JSON and the multi-asset file.
/// Zero-valued `difference`, `leverage`, `before` and `threshold` are filled
/// from [`StrategyDefaults`] by [`StrategyConfig::with_defaults`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    /// Base asset, e.g. `BTC`; contracts are `BTCBUSD` and `BTCUSDT`
    pub symbol: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Quantity per order
    pub quantity: Decimal,
    /// Total quantity to build or unwind
    pub total: Decimal,
    /// Only reduce existing exposure
    #[serde(default)]
    pub reduce: bool,
    /// Alternate open/close on mark-price gap thresholds
    #[serde(default)]
    pub arbitrage: bool,
    /// Mark-price gap threshold
    #[serde(default)]
    pub difference: Decimal,
    #[serde(default)]
    pub leverage: u32,
    /// Quote variant bought while reducing
    #[serde(default, deserialize_with = "deserialize_bid_side")]
    pub bid_side: Option<QuoteVariant>,
    /// Resume from live exchange positions at startup
    #[serde(default)]
    pub monitor: bool,
    /// Minutes before funding in which a reversal may commit
    #[serde(default)]
    pub before: u32,
    /// Minimum annualized yield estimate for a reversal
    #[serde(default)]
    pub threshold: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

impl fmt::Debug for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyConfig")
            .field("symbol", &self.symbol)
            .field("credentials", &self.credentials())
            .field("quantity", &self.quantity)
            .field("total", &self.total)
            .field("reduce", &self.reduce)
            .field("arbitrage", &self.arbitrage)
            .field("difference", &self.difference)
            .field("leverage", &self.leverage)
            .field("bid_side", &self.bid_side)
            .field("monitor", &self.monitor)
            .field("before", &self.before)
            .field("threshold", &self.threshold)
            .field("webhook", &self.webhook)
            .finish()
    }
}

/// Invalid strategy settings. Fatal before the run loop starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("quantity per order must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("total quantity must be positive, got {0}")]
    NonPositiveTotal(Decimal),
    #[error("leverage must be at least 1")]
    ZeroLeverage,
    #[error("mark price gap threshold must not be negative, got {0}")]
    NegativeThreshold(Decimal),
}

impl StrategyConfig {
    pub fn new(symbol: impl Into<String>, quantity: Decimal, total: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            api_key: String::new(),
            api_secret: String::new(),
            quantity,
            total,
            reduce: false,
            arbitrage: false,
            difference: Decimal::ZERO,
            leverage: 0,
            bid_side: None,
            monitor: false,
            before: 0,
            threshold: Decimal::ZERO,
            webhook: None,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    /// Fill unset fields from the defaults.
    pub fn with_defaults(mut self, defaults: &StrategyDefaults) -> Self {
        if self.difference.is_zero() {
            self.difference = defaults.gap_threshold;
        }
        if self.leverage == 0 {
            self.leverage = defaults.leverage;
        }
        if self.before == 0 {
            self.before = defaults.funding_window_minutes;
        }
        if self.threshold.is_zero() {
            self.threshold = defaults.min_yield;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveQuantity(self.quantity));
        }
        if self.total <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveTotal(self.total));
        }
        if self.leverage == 0 {
            return Err(ConfigError::ZeroLeverage);
        }
        if self.difference < Decimal::ZERO {
            return Err(ConfigError::NegativeThreshold(self.difference));
        }
        Ok(())
    }
}

/// Accepts `"BUSD"`, `"USDT"` (any case), an empty string or null.
fn deserialize_bid_side<'de, D>(deserializer: D) -> Result<Option<QuoteVariant>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<QuoteVariant>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_defaults_fills_only_unset_fields() {
        let defaults = StrategyDefaults::default();
        let mut config = StrategyConfig::new("BTC", dec!(0.01), dec!(0.1));
        config.leverage = 3;

        let config = config.with_defaults(&defaults);
        assert_eq!(config.leverage, 3);
        assert_eq!(config.difference, dec!(0.05));
        assert_eq!(config.before, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let config = StrategyConfig::new("BTC", Decimal::ZERO, dec!(1))
            .with_defaults(&StrategyDefaults::default());
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositiveQuantity(Decimal::ZERO))
        );

        let config = StrategyConfig::new(" ", dec!(1), dec!(1))
            .with_defaults(&StrategyDefaults::default());
        assert_eq!(config.validate(), Err(ConfigError::EmptySymbol));
    }

    #[test]
    fn test_strategy_config_from_control_surface_json() {
        let config: StrategyConfig = serde_json::from_str(
            r#"{
                "symbol": "ETH",
                "apiKey": "abcdefgh",
                "apiSecret": "secret",
                "quantity": 0.01,
                "total": "0.05",
                "reduce": true,
                "bidSide": "busd"
            }"#,
        )
        .unwrap();

        assert_eq!(config.quantity, dec!(0.01));
        assert_eq!(config.total, dec!(0.05));
        assert_eq!(config.bid_side, Some(QuoteVariant::Busd));
        assert_eq!(config.credentials().key_hint(), "abcde");
        assert!(config.webhook.is_none());
    }

    #[test]
    fn test_empty_bid_side_is_none() {
        let config: StrategyConfig = serde_json::from_str(
            r#"{"symbol": "BTC", "quantity": 1, "total": 2, "bidSide": ""}"#,
        )
        .unwrap();
        assert_eq!(config.bid_side, None);

        let err = serde_json::from_str::<StrategyConfig>(
            r#"{"symbol": "BTC", "quantity": 1, "total": 2, "bidSide": "USDC"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut config = StrategyConfig::new("BTC", dec!(1), dec!(2));
        config.api_key = "KEY123456".to_string();
        config.api_secret = "topsecret".to_string();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("KEY12"));
    }
}
