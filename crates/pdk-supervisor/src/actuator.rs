//! The shutdown actuator.
//!
//! Sequence for a full shutdown:
//! 1. durable halt flag (event log HALT record, then the live-state
//!    mirror; the trading process refuses new intents from here on)
//! 2. broker `cancel_all` under SUPERVISOR credentials, retried
//! 3. flattening market orders, one per open position, each under a
//!    supervisor-issued deterministic `client_order_id` so a re-run of
//!    the actuator cannot double-flatten
//! 4. cooperative stop request to the trading process; after the grace
//!    window, SIGTERM then SIGKILL

use chrono::Utc;
use pdk_broker::{BrokerAdapter, PlaceOrderRequest};
use pdk_cache::{LiveStateCache, Stamped};
use pdk_eventlog::{EventLogWriter, RecordKind};
use pdk_schemas::{HaltFlag, OrderType, ProcessRole, Side};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ActuatorConfig {
    /// Cooperative-shutdown window before forced termination.
    pub grace: Duration,
    /// Trading-process control surface (emergency-halt endpoint).
    pub trading_api_url: String,
    /// Step 4 switch: false when no separate trading process exists
    /// (embedded paper runs, tests).
    pub terminate_trading: bool,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            trading_api_url: "http://127.0.0.1:8790".to_string(),
            terminate_trading: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cancelled: u32,
    pub flatten_client_order_ids: Vec<String>,
    pub tp_signalled: bool,
}

/// Deterministic idempotency key for a supervisor flattening order:
/// same symbol and day give the same key, so re-running the actuator
/// maps onto the same broker order instead of a second flatten.
pub fn supervisor_flatten_cid(symbol: &str, yyyymmdd: i32) -> String {
    format!("cid-sv-flat-{symbol}-{yyyymmdd}")
}

pub struct ShutdownActuator<B: BrokerAdapter> {
    broker: Arc<B>,
    cache: Arc<LiveStateCache>,
    log: EventLogWriter,
    cfg: ActuatorConfig,
    http: reqwest::Client,
}

impl<B: BrokerAdapter> ShutdownActuator<B> {
    pub fn new(
        broker: Arc<B>,
        cache: Arc<LiveStateCache>,
        log: EventLogWriter,
        cfg: ActuatorConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client");
        Self {
            broker,
            cache,
            log,
            cfg,
            http,
        }
    }

    /// Set the durable halt flag. Idempotent; the flag only clears by
    /// explicit operator action, never by restart.
    pub fn set_halt(&self, reason: &str) {
        let now = Utc::now();
        let _ = self.log.append(
            RecordKind::Halt,
            serde_json::json!({
                "reason": reason,
                "set_by": "supervisor",
            }),
        );
        self.cache
            .put_halt(Stamped::now(HaltFlag::set(reason, "supervisor", now)));
        tracing::warn!(reason, "halt flag set");
    }

    /// Cancel every open order, retrying transient failures.
    pub async fn cancel_all(&self) -> u32 {
        for attempt in 1..=3u32 {
            match self.broker.cancel_all().await {
                Ok(n) => return n,
                Err(e) if e.is_retriable() && attempt < 3 => {
                    tracing::warn!(attempt, "cancel_all retriable failure: {e}");
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => {
                    tracing::error!("cancel_all failed: {e}");
                    return 0;
                }
            }
        }
        0
    }

    /// Close one symbol with a market order in the opposite direction.
    pub async fn flatten_symbol(&self, symbol: &str, yyyymmdd: i32) -> Option<String> {
        let positions = match self.broker.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("get_positions failed: {e}");
                return None;
            }
        };
        let pos = positions.iter().find(|p| p.symbol == symbol && p.qty != 0)?;

        let side = if pos.qty > 0 { Side::Sell } else { Side::Buy };
        let cid = supervisor_flatten_cid(symbol, yyyymmdd);
        let req = PlaceOrderRequest {
            client_order_id: cid.clone(),
            symbol: symbol.to_string(),
            qty: pos.qty.abs(),
            side,
            order_type: OrderType::Market,
            limit_price: None,
        };
        match self.broker.place(&req).await {
            Ok(_) => {
                let _ = self.log.append(
                    RecordKind::OrderCreated,
                    serde_json::json!({
                        "client_order_id": cid,
                        "symbol": symbol,
                        "qty": pos.qty.abs(),
                        "side": side,
                        "issued_by": "supervisor",
                    }),
                );
                Some(cid)
            }
            Err(e) => {
                tracing::error!(symbol, "flatten order failed: {e}");
                None
            }
        }
    }

    pub async fn cancel_order(&self, broker_order_id: &str) {
        if let Err(e) = self.broker.cancel(broker_order_id).await {
            tracing::error!(broker_order_id, "zombie cancel failed: {e}");
        }
    }

    /// The full shutdown path.
    pub async fn flatten_all_and_halt(&self, reason: &str, yyyymmdd: i32) -> ShutdownReport {
        self.set_halt(reason);

        let cancelled = self.cancel_all().await;

        let mut flatten_ids = Vec::new();
        match self.broker.get_positions().await {
            Ok(positions) => {
                for pos in positions.iter().filter(|p| p.qty != 0) {
                    if let Some(cid) = self.flatten_symbol(&pos.symbol, yyyymmdd).await {
                        flatten_ids.push(cid);
                    }
                }
            }
            Err(e) => tracing::error!("get_positions failed during shutdown: {e}"),
        }

        let tp_signalled = if self.cfg.terminate_trading {
            self.terminate_trading_process().await
        } else {
            false
        };

        ShutdownReport {
            cancelled,
            flatten_client_order_ids: flatten_ids,
            tp_signalled,
        }
    }

    /// Cooperative request first; forced termination after the grace.
    async fn terminate_trading_process(&self) -> bool {
        let url = format!(
            "{}/system/emergency-halt",
            self.cfg.trading_api_url.trim_end_matches('/')
        );
        match self.http.post(&url).send().await {
            Ok(_) => tracing::info!("cooperative halt requested"),
            Err(e) => tracing::warn!("cooperative halt request failed: {e}"),
        }

        tokio::time::sleep(self.cfg.grace).await;

        // The trading heartbeat carries the pid.
        let _ = self.cache.refresh_from_mirror();
        let Some(hb) = self.cache.heartbeat(ProcessRole::Trading) else {
            tracing::info!("no trading heartbeat; nothing to terminate");
            return true;
        };

        force_kill(hb.process_id);
        true
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    let pid = pid as libc::pid_t;
    tracing::warn!(pid, "forcing trading process termination");
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    std::thread::sleep(Duration::from_secs(2));
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn force_kill(pid: u32) {
    tracing::error!(pid, "forced termination unsupported on this platform");
}
