//! Typed configuration for both processes.
//!
//! Every field has a sane default so a minimal YAML file (or an empty one)
//! yields a runnable paper-mode configuration. Thresholds expressed in
//! basis points apply to start-of-day or peak equity as noted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerMode {
    /// Deterministic in-process broker; no network.
    Paper,
    /// Upstream broker over HTTP + event stream.
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_broker_mode")]
    pub mode: BrokerMode,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Per-call deadline for broker REST operations.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            mode: default_broker_mode(),
            base_url: default_base_url(),
            stream_url: default_stream_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_broker_mode() -> BrokerMode {
    BrokerMode::Paper
}
fn default_base_url() -> String {
    "http://127.0.0.1:9321".to_string()
}
fn default_stream_url() -> String {
    "ws://127.0.0.1:9321/stream".to_string()
}
fn default_request_timeout_secs() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OmsSettings {
    /// No broker event within this window after placement => UNKNOWN.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// SUBMITTED|CANCELLING older than this is a zombie escalation.
    #[serde(default = "default_zombie_timeout_secs")]
    pub zombie_timeout_secs: u64,
    /// Max placement attempts under one client_order_id.
    #[serde(default = "default_place_retry_max")]
    pub place_retry_max: u32,
}

impl Default for OmsSettings {
    fn default() -> Self {
        Self {
            ack_timeout_secs: default_ack_timeout_secs(),
            zombie_timeout_secs: default_zombie_timeout_secs(),
            place_retry_max: default_place_retry_max(),
        }
    }
}

fn default_ack_timeout_secs() -> u64 {
    3
}
fn default_zombie_timeout_secs() -> u64 {
    300
}
fn default_place_retry_max() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long "broker says not found" must persist before UNKNOWN -> FAILED.
    #[serde(default = "default_not_found_grace_secs")]
    pub not_found_grace_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            not_found_grace_secs: default_not_found_grace_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_not_found_grace_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Storage roots
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_event_log_root")]
    pub event_log_root: PathBuf,
    /// Shared live-state mirror; the supervisor reads (and halts) here.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            event_log_root: default_event_log_root(),
            cache_root: default_cache_root(),
        }
    }
}

fn default_event_log_root() -> PathBuf {
    PathBuf::from("./data/eventlog")
}
fn default_cache_root() -> PathBuf {
    PathBuf::from("./data/lsc")
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    /// ETL only runs when true AND PDK_ANALYTICS_DATABASE_URL is set.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_etl_interval_secs")]
    pub etl_interval_secs: u64,
}

fn default_etl_interval_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_decision_interval_secs")]
    pub decision_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            decision_interval_secs: default_decision_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8790".to_string()
}
fn default_decision_interval_secs() -> u64 {
    5
}
fn default_heartbeat_interval_secs() -> u64 {
    1
}

// ---------------------------------------------------------------------------
// Risk bridge
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Pre-trade cap: resulting |position notional| / equity, in bps.
    #[serde(default = "default_max_position_bps")]
    pub max_position_bps: i64,
    #[serde(default = "default_max_open_orders")]
    pub max_open_orders: usize,
    /// Broker rejects in one window before the bridge trips a halt.
    #[serde(default = "default_reject_storm_limit")]
    pub reject_storm_limit: u32,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_position_bps: default_max_position_bps(),
            max_open_orders: default_max_open_orders(),
            reject_storm_limit: default_reject_storm_limit(),
        }
    }
}

fn default_max_position_bps() -> i64 {
    2_500
}
fn default_max_open_orders() -> usize {
    32
}
fn default_reject_storm_limit() -> u32 {
    10
}

// ---------------------------------------------------------------------------
// Supervisor kill rules
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KillRuleSettings {
    /// Daily loss vs start-of-day equity; breach => graceful flatten + halt.
    #[serde(default = "default_daily_loss_bps")]
    pub daily_loss_bps: i64,
    /// Peak-to-trough drop; breach => hard halt (not auto-resumable).
    #[serde(default = "default_max_drawdown_bps")]
    pub max_drawdown_bps: i64,
    /// Single-symbol share of equity; breach => flatten that symbol.
    #[serde(default = "default_concentration_bps")]
    pub concentration_bps: i64,
    #[serde(default = "default_kr_zombie_secs")]
    pub zombie_secs: u64,
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: u64,
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// Cooperative-shutdown grace before forced termination.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Friday 15:55 America/New_York flatten.
    #[serde(default = "default_end_of_week_flatten")]
    pub end_of_week_flatten: bool,
}

impl Default for KillRuleSettings {
    fn default() -> Self {
        Self {
            daily_loss_bps: default_daily_loss_bps(),
            max_drawdown_bps: default_max_drawdown_bps(),
            concentration_bps: default_concentration_bps(),
            zombie_secs: default_kr_zombie_secs(),
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            cycle_secs: default_cycle_secs(),
            grace_secs: default_grace_secs(),
            end_of_week_flatten: default_end_of_week_flatten(),
        }
    }
}

fn default_daily_loss_bps() -> i64 {
    500
}
fn default_max_drawdown_bps() -> i64 {
    1_500
}
fn default_concentration_bps() -> i64 {
    2_500
}
fn default_kr_zombie_secs() -> u64 {
    300
}
fn default_heartbeat_stale_secs() -> u64 {
    30
}
fn default_cycle_secs() -> u64 {
    5
}
fn default_grace_secs() -> u64 {
    10
}
fn default_end_of_week_flatten() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Top-level documents
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub oms: OmsSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub risk: RiskSettings,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub kill: KillRuleSettings,
    /// Trading-process control surface, for the cooperative halt request.
    #[serde(default = "default_trading_api_url")]
    pub trading_api_url: String,
}

fn default_trading_api_url() -> String {
    "http://127.0.0.1:8790".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_paper_defaults() {
        let cfg: TradingConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.broker.mode, BrokerMode::Paper);
        assert_eq!(cfg.oms.ack_timeout_secs, 3);
        assert_eq!(cfg.oms.zombie_timeout_secs, 300);
        assert_eq!(cfg.reconcile.sweep_interval_secs, 30);
    }

    #[test]
    fn kill_rule_defaults_match_policy() {
        let k = KillRuleSettings::default();
        assert_eq!(k.daily_loss_bps, 500);
        assert_eq!(k.max_drawdown_bps, 1_500);
        assert_eq!(k.concentration_bps, 2_500);
        assert_eq!(k.heartbeat_stale_secs, 30);
        assert_eq!(k.grace_secs, 10);
    }

    #[test]
    fn partial_document_overrides_one_field() {
        let cfg: TradingConfig =
            serde_json::from_value(serde_json::json!({"oms": {"ack_timeout_secs": 7}})).unwrap();
        assert_eq!(cfg.oms.ack_timeout_secs, 7);
        assert_eq!(cfg.oms.place_retry_max, 3);
    }
}
