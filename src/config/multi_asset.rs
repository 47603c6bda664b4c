//! Declarative multi-asset file.
//!
//! ```yaml
//! apiKey: ...
//! apiSecret: ...
//! leverage: 10
//! difference: 0.05
//! settings:
//!   - symbol: BTC
//!     quantity: 0.001
//!     total: 0.01
//!   - symbol: ETH
//!     quantity: 0.01
//!     total: 0.1
//!     leverage: 5
//! ```

use super::{StrategyConfig, StrategyDefaults};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File-level defaults plus one entry per strategy instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAssetFile {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default)]
    pub difference: Decimal,
    #[serde(default)]
    pub before: u32,
    #[serde(default)]
    pub threshold: Decimal,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub settings: Vec<StrategyConfig>,
}

impl MultiAssetFile {
    /// Load a YAML file (JSON is accepted as a YAML subset).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read multi-asset file {:?}", path))?;

        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse multi-asset file {:?}", path))
    }

    /// Resolve every entry: entry value, else file-level value, else default.
    pub fn resolve(self, defaults: &StrategyDefaults) -> Vec<StrategyConfig> {
        let Self {
            api_key,
            api_secret,
            leverage,
            difference,
            before,
            threshold,
            webhook,
            settings,
        } = self;

        settings
            .into_iter()
            .map(|mut setting| {
                if setting.api_key.is_empty() {
                    setting.api_key = api_key.clone();
                }
                if setting.api_secret.is_empty() {
                    setting.api_secret = api_secret.clone();
                }
                if setting.leverage == 0 {
                    setting.leverage = leverage;
                }
                if setting.difference.is_zero() {
                    setting.difference = difference;
                }
                if setting.before == 0 {
                    setting.before = before;
                }
                if setting.threshold.is_zero() {
                    setting.threshold = threshold;
                }
                if setting.webhook.is_none() {
                    setting.webhook = webhook.clone();
                }
                setting.with_defaults(defaults)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_entries_fall_back_to_file_level_values() {
        let file = MultiAssetFile {
            api_key: "file-key".to_string(),
            api_secret: "file-secret".to_string(),
            leverage: 4,
            difference: dec!(0.02),
            settings: vec![
                StrategyConfig::new("BTC", dec!(0.001), dec!(0.01)),
                {
                    let mut eth = StrategyConfig::new("ETH", dec!(0.01), dec!(0.1));
                    eth.api_key = "eth-key".to_string();
                    eth.leverage = 2;
                    eth
                },
            ],
            ..Default::default()
        };

        let resolved = file.resolve(&StrategyDefaults::default());
        assert_eq!(resolved.len(), 2);

        assert_eq!(resolved[0].api_key, "file-key");
        assert_eq!(resolved[0].api_secret, "file-secret");
        assert_eq!(resolved[0].leverage, 4);
        assert_eq!(resolved[0].difference, dec!(0.02));

        assert_eq!(resolved[1].api_key, "eth-key");
        assert_eq!(resolved[1].api_secret, "file-secret");
        assert_eq!(resolved[1].leverage, 2);
        // funding window was unset everywhere
        assert_eq!(resolved[1].before, 60);
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = std::env::temp_dir().join(format!("pgf-multi-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("assets.yaml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "apiKey: k\napiSecret: s\nleverage: 3\nsettings:\n  - symbol: BTC\n    quantity: 0.001\n    total: 0.003\n    bidSide: USDT\n"
        )
        .unwrap();

        let loaded = MultiAssetFile::load(&path).unwrap();
        assert_eq!(loaded.leverage, 3);
        assert_eq!(loaded.settings.len(), 1);
        assert_eq!(loaded.settings[0].symbol, "BTC");
        assert_eq!(loaded.settings[0].total, dec!(0.003));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(MultiAssetFile::load("/nonexistent/assets.yaml").is_err());
    }
}
