//! The cycle loop: gather → evaluate → actuate.

use crate::actuator::ShutdownActuator;
use crate::rules::{self, day_id, KillAction, KillConfig, KillInput, OpenOrderInfo, SupervisorState};
use chrono::Utc;
use pdk_broker::BrokerAdapter;
use pdk_cache::{logical_ts_now, LiveStateCache, Stamped};
use pdk_schemas::{micros_from_decimal_str, Heartbeat, ProcessRole};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

pub struct Supervisor<B: BrokerAdapter> {
    broker: Arc<B>,
    cache: Arc<LiveStateCache>,
    actuator: ShutdownActuator<B>,
    cfg: KillConfig,
    cycle: Duration,
    state: Mutex<Option<SupervisorState>>,
    heartbeat_seq: Mutex<u64>,
}

impl<B: BrokerAdapter> Supervisor<B> {
    pub fn new(
        broker: Arc<B>,
        cache: Arc<LiveStateCache>,
        actuator: ShutdownActuator<B>,
        cfg: KillConfig,
        cycle: Duration,
    ) -> Self {
        Self {
            broker,
            cache,
            actuator,
            cfg,
            cycle,
            state: Mutex::new(None),
            heartbeat_seq: Mutex::new(0),
        }
    }

    /// Build this cycle's input from the live-state mirror plus direct
    /// broker reads. Never depends on the trading process being alive.
    async fn gather(&self) -> KillInput {
        if let Err(e) = self.cache.refresh_from_mirror() {
            tracing::warn!("mirror refresh failed: {e:#}");
        }
        let now = Utc::now();

        let equity_micros = self.cache.equity().map(|e| e.equity_micros).unwrap_or(0);

        let symbol_notional_micros = match self.broker.get_positions().await {
            Ok(positions) => positions
                .iter()
                .filter_map(|p| {
                    let px = micros_from_decimal_str(&p.avg_entry_price).ok()?;
                    let notional = px.checked_mul(p.qty.abs())?;
                    Some((p.symbol.clone(), notional))
                })
                .collect(),
            Err(e) => {
                tracing::warn!("broker positions unavailable: {e}");
                Vec::new()
            }
        };

        let open_orders = match self.broker.list_open_orders().await {
            Ok(orders) => orders
                .iter()
                .map(|o| OpenOrderInfo {
                    broker_order_id: o.broker_order_id.clone(),
                    status: o.status.clone(),
                    age_secs: (now - o.created_at).num_seconds(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("broker open orders unavailable: {e}");
                Vec::new()
            }
        };

        let tp_heartbeat_age_secs = self
            .cache
            .heartbeat(ProcessRole::Trading)
            .map(|hb| (now - hb.ts).num_seconds());

        KillInput {
            now,
            equity_micros,
            symbol_notional_micros,
            open_orders,
            tp_heartbeat_age_secs,
        }
    }

    /// One supervision cycle. Returns the actions that fired (already
    /// executed) for logging and tests.
    pub async fn cycle(&self) -> Vec<KillAction> {
        let input = self.gather().await;
        let today = day_id(input.now);

        let actions = {
            let mut guard = self.state.lock().await;
            let st = guard.get_or_insert_with(|| SupervisorState::new(today, input.equity_micros));
            st.tick(today, input.equity_micros);
            rules::evaluate(&self.cfg, st, &input)
        };

        for action in &actions {
            self.execute(action, today).await;
        }

        self.beat().await;
        actions
    }

    async fn execute(&self, action: &KillAction, today: i32) {
        match action {
            KillAction::HardHalt { reason } => {
                tracing::error!(%reason, "HARD HALT");
                // Positions stay; orders are cancelled and the flag is set.
                self.actuator.set_halt(reason);
                self.actuator.cancel_all().await;
            }
            KillAction::FlattenAllAndHalt { reason } => {
                tracing::error!(%reason, "flatten + halt");
                self.actuator.flatten_all_and_halt(reason, today).await;
            }
            KillAction::FlattenSymbol { symbol, reason } => {
                tracing::warn!(%symbol, %reason, "flattening symbol");
                self.actuator.flatten_symbol(symbol, today).await;
            }
            KillAction::CancelOrder {
                broker_order_id,
                reason,
            } => {
                tracing::warn!(%broker_order_id, %reason, "cancelling zombie");
                self.actuator.cancel_order(broker_order_id).await;
            }
            KillAction::FlattenAll { reason } => {
                tracing::warn!(%reason, "end-of-week flatten");
                if let Ok(positions) = self.broker.get_positions().await {
                    for pos in positions.iter().filter(|p| p.qty != 0) {
                        self.actuator.flatten_symbol(&pos.symbol, today).await;
                    }
                }
            }
        }
    }

    async fn beat(&self) {
        let mut seq = self.heartbeat_seq.lock().await;
        *seq += 1;
        self.cache.put_heartbeat(Stamped::new(
            logical_ts_now(),
            *seq,
            Heartbeat {
                process_id: std::process::id(),
                role: ProcessRole::Supervisor,
                ts: Utc::now(),
                seq: *seq,
            },
        ));
    }

    /// Run until `shutdown` flips true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cycle);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let actions = self.cycle().await;
                    if !actions.is_empty() {
                        tracing::info!(count = actions.len(), "kill actions executed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
