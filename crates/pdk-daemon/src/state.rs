//! Shared handler state. All types here are `Clone`-able via `Arc`;
//! handlers receive `State<Arc<AppState>>` from axum.

use pdk_broadcast::BroadcastHub;
use pdk_cache::LiveStateCache;
use pdk_schemas::HaltFlag;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Point-in-time process status, returned by `GET /v1/status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub service: String,
    pub version: String,
    pub run_id: Uuid,
    /// "running" | "halted"
    pub state: String,
    pub uptime_secs: u64,
    pub halt: Option<HaltFlag>,
}

pub struct AppState {
    pub build: BuildInfo,
    pub run_id: Uuid,
    pub cache: Arc<LiveStateCache>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(run_id: Uuid, cache: Arc<LiveStateCache>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            build: BuildInfo {
                service: "pdk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            run_id,
            cache,
            hub,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let halt = self.cache.halt();
        StatusSnapshot {
            service: self.build.service.to_string(),
            version: self.build.version.to_string(),
            run_id: self.run_id,
            state: if halt.as_ref().map(|h| h.active).unwrap_or(false) {
                "halted".to_string()
            } else {
                "running".to_string()
            },
            uptime_secs: uptime_secs(),
            halt,
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
