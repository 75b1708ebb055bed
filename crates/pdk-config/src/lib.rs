//! pdk-config
//!
//! Layered YAML configuration for both processes. Later files override
//! earlier files via deep-merge; the merged document is canonicalized
//! (sorted keys, compact JSON) and hashed so every run can record exactly
//! which configuration it executed under.
//!
//! Secrets never appear in config files: broker credentials and database
//! URLs come from the environment only, with distinct variable pairs for
//! the trading process and the supervisor.

mod layered;
mod secrets;
mod settings;

pub use layered::{load_layered_yaml, LoadedConfig};
pub use secrets::{analytics_database_url, BrokerCredentials};
pub use settings::{
    AnalyticsSettings, BrokerMode, BrokerSettings, DaemonSettings, KillRuleSettings, OmsSettings,
    ReconcileSettings, RiskSettings, StorageSettings, SupervisorConfig, TradingConfig,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Load and type-check the trading-process configuration.
pub fn load_trading_config(paths: &[&Path]) -> Result<(TradingConfig, LoadedConfig)> {
    let loaded = load_layered_yaml(paths)?;
    let cfg: TradingConfig = serde_json::from_value(loaded.config_json.clone())
        .context("trading config failed validation")?;
    Ok((cfg, loaded))
}

/// Load and type-check the supervisor configuration.
pub fn load_supervisor_config(paths: &[&Path]) -> Result<(SupervisorConfig, LoadedConfig)> {
    let loaded = load_layered_yaml(paths)?;
    let cfg: SupervisorConfig = serde_json::from_value(loaded.config_json.clone())
        .context("supervisor config failed validation")?;
    Ok((cfg, loaded))
}
