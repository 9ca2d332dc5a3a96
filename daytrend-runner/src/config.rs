//! Run configuration loaded from `./config.json`.
//!
//! Shape:
//! ```json
//! {
//!   "portfolio_id": "BASE_PORTFOLIO",
//!   "initial_capital": 500000.0,
//!   "portfolio": {
//!     "strategies": {
//!       "tf_slow": {
//!         "type": "TrendFollowingSlowStrategy",
//!         "enabled_live": true,
//!         "default_allocation": 0.5,
//!         "config": { "risk_target": 0.15 }
//!       }
//!     }
//!   },
//!   "database": { "host": "localhost", "port": 5432, "name": "trading",
//!                 "username": "u", "password": "p" },
//!   "email": { "smtp_host": "...", "smtp_port": 587, "username": "...",
//!              "password": "...", "from_email": "...", "to_emails": [],
//!              "use_tls": true }
//! }
//! ```
//!
//! Allocations are filtered by `enabled_live` and normalized to sum to one;
//! zero enabled strategies is a configuration error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use daytrend_core::strategy::{TrendConfig, TrendVariant};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_portfolio_id() -> String {
    "BASE_PORTFOLIO".to_string()
}

fn default_initial_capital() -> f64 {
    500_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_portfolio_id")]
    pub portfolio_id: String,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    pub portfolio: PortfolioSection,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSection {
    pub strategies: BTreeMap<String, StrategyDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDef {
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub enabled_live: bool,
    pub default_allocation: f64,
    #[serde(default)]
    pub config: Option<TrendOverrides>,
}

/// Per-strategy overrides on the variant's numeric defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendOverrides {
    pub weight: Option<f64>,
    pub risk_target: Option<f64>,
    pub idm: Option<f64>,
    pub use_position_buffering: Option<bool>,
    pub ema_windows: Option<Vec<[usize; 2]>>,
    pub vol_lookback_short: Option<usize>,
    pub vol_lookback_long: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub to_emails: Vec<String>,
    pub use_tls: bool,
}

impl LiveConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capital <= 0.0 {
            return Err(ConfigError::Invalid("initial_capital must be positive".into()));
        }
        let enabled = self.enabled_strategies();
        if enabled.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one strategy must have enabled_live = true".into(),
            ));
        }
        for (id, def) in &enabled {
            if TrendVariant::from_type_name(&def.strategy_type).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown strategy type '{}' for '{id}'",
                    def.strategy_type
                )));
            }
            if def.default_allocation <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "non-positive allocation for '{id}'"
                )));
            }
        }
        Ok(())
    }

    /// Enabled strategies in lexicographic id order.
    pub fn enabled_strategies(&self) -> Vec<(&String, &StrategyDef)> {
        self.portfolio
            .strategies
            .iter()
            .filter(|(_, def)| def.enabled_live)
            .collect()
    }

    /// Allocations over enabled strategies, normalized to sum to one.
    pub fn normalized_allocations(&self) -> Result<BTreeMap<String, f64>, ConfigError> {
        let enabled = self.enabled_strategies();
        let total: f64 = enabled.iter().map(|(_, d)| d.default_allocation).sum();
        if total <= 0.0 {
            return Err(ConfigError::Invalid(
                "enabled allocations sum to zero".into(),
            ));
        }
        Ok(enabled
            .into_iter()
            .map(|(id, def)| (id.clone(), def.default_allocation / total))
            .collect())
    }

    /// Opaque strategy-config JSON persisted with the run metadata.
    pub fn strategy_configs_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.portfolio.strategies).unwrap_or(serde_json::Value::Null)
    }
}

impl StrategyDef {
    /// Variant defaults with this strategy's overrides applied.
    pub fn trend_config(&self) -> Result<(TrendVariant, TrendConfig), ConfigError> {
        let variant = TrendVariant::from_type_name(&self.strategy_type).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown strategy type '{}'", self.strategy_type))
        })?;
        let mut config = TrendConfig::defaults_for(variant);
        if let Some(over) = &self.config {
            if let Some(weight) = over.weight {
                config.weight = weight;
            }
            if let Some(risk_target) = over.risk_target {
                config.risk_target = risk_target;
            }
            if let Some(idm) = over.idm {
                config.idm = idm;
            }
            if let Some(buffering) = over.use_position_buffering {
                config.use_position_buffering = buffering;
            }
            if let Some(windows) = &over.ema_windows {
                config.ema_windows = windows.iter().map(|[f, s]| (*f, *s)).collect();
            }
            if let Some(short) = over.vol_lookback_short {
                config.vol_lookback_short = short;
            }
            if let Some(long) = over.vol_lookback_long {
                config.vol_lookback_long = long;
            }
        }
        Ok((variant, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "portfolio_id": "BASE_PORTFOLIO",
            "initial_capital": 500000.0,
            "portfolio": {
                "strategies": {
                    "tf_main": {
                        "type": "TrendFollowingStrategy",
                        "enabled_live": true,
                        "default_allocation": 0.6,
                        "config": { "risk_target": 0.18 }
                    },
                    "tf_fast": {
                        "type": "TrendFollowingFastStrategy",
                        "enabled_live": true,
                        "default_allocation": 0.2
                    },
                    "tf_paused": {
                        "type": "TrendFollowingSlowStrategy",
                        "enabled_live": false,
                        "default_allocation": 0.2
                    }
                }
            },
            "database": {
                "host": "localhost", "port": 5432, "name": "trading",
                "username": "svc", "password": "secret"
            },
            "email": {
                "smtp_host": "smtp.example.com", "smtp_port": 587,
                "username": "svc", "password": "secret",
                "from_email": "ops@example.com", "to_emails": ["pm@example.com"],
                "use_tls": true
            }
        }"#
    }

    fn parse() -> LiveConfig {
        let config: LiveConfig = serde_json::from_str(sample_json()).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn parses_and_validates_sample() {
        let config = parse();
        assert_eq!(config.portfolio_id, "BASE_PORTFOLIO");
        assert_eq!(config.enabled_strategies().len(), 2);
    }

    #[test]
    fn allocations_filter_disabled_and_normalize() {
        let config = parse();
        let allocations = config.normalized_allocations().unwrap();
        assert_eq!(allocations.len(), 2);
        // 0.6 and 0.2 normalize over 0.8.
        assert!((allocations["tf_main"] - 0.75).abs() < 1e-12);
        assert!((allocations["tf_fast"] - 0.25).abs() < 1e-12);
        let total: f64 = allocations.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn overrides_apply_on_variant_defaults() {
        let config = parse();
        let (variant, trend) = config.portfolio.strategies["tf_main"].trend_config().unwrap();
        assert_eq!(variant, TrendVariant::Standard);
        assert_eq!(trend.risk_target, 0.18);
        // Untouched fields keep variant defaults.
        assert_eq!(trend.vol_lookback_short, 32);
    }

    #[test]
    fn zero_enabled_strategies_is_invalid() {
        let mut config = parse();
        for def in config.portfolio.strategies.values_mut() {
            def.enabled_live = false;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_strategy_type_is_invalid() {
        let mut config = parse();
        config
            .portfolio
            .strategies
            .get_mut("tf_main")
            .unwrap()
            .strategy_type = "MeanReversionStrategy".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn portfolio_id_defaults_when_absent() {
        let json = sample_json().replacen("\"portfolio_id\": \"BASE_PORTFOLIO\",", "", 1);
        let config: LiveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.portfolio_id, "BASE_PORTFOLIO");
    }

    #[test]
    fn ema_window_override_replaces_defaults() {
        let mut config = parse();
        config.portfolio.strategies.get_mut("tf_fast").unwrap().config = Some(TrendOverrides {
            ema_windows: Some(vec![[4, 16], [8, 32]]),
            ..TrendOverrides::default()
        });
        let (_, trend) = config.portfolio.strategies["tf_fast"].trend_config().unwrap();
        assert_eq!(trend.ema_windows, vec![(4, 16), (8, 32)]);
    }
}
