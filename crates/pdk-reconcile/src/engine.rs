//! Reconciliation passes.

use pdk_broker::BrokerAdapter;
use pdk_cache::LiveStateCache;
use pdk_eventlog::{EventLogWriter, RecordKind};
use pdk_oms::{OrderEngine, Resolution};
use pdk_schemas::{
    map_broker_status, micros_from_decimal_str, BrokerOrderView, Order, OrderState,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    pub sweep_interval: Duration,
    /// "Broker says not found" must persist this long before UNKNOWN
    /// resolves to FAILED.
    pub not_found_grace: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            not_found_grace: Duration::from_secs(60),
        }
    }
}

/// What one `reconcile_one` call concluded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order is not in a reconciler-owned state; nothing to do.
    Skipped,
    /// Broker truth adopted; the order now has this state.
    Resolved(OrderState),
    /// No definitive answer this pass (transport failure, cancel still in
    /// flight, or not-found still inside the grace window).
    Deferred,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub orders_resolved: usize,
    pub orders_deferred: usize,
    pub positions_overwritten: Vec<String>,
}

/// Map a broker order view onto a reconciler verdict.
///
/// Returns `None` when the view carries no recognizable status — no
/// evidence is never treated as SUBMITTED.
pub fn resolution_from_view(view: &BrokerOrderView) -> Option<Resolution> {
    let state = map_broker_status(&view.status)?;
    let avg = micros_from_decimal_str(&view.avg_fill_price).unwrap_or(0);
    Some(Resolution {
        state,
        filled_qty: view.filled_qty,
        avg_fill_price_micros: avg,
        broker_ref: Some(view.broker_order_id.clone()),
    })
}

pub struct Reconciler<B: BrokerAdapter> {
    broker: Arc<B>,
    engine: Arc<OrderEngine<B>>,
    cache: Arc<LiveStateCache>,
    log: EventLogWriter,
    cfg: ReconcileConfig,
}

impl<B: BrokerAdapter> Reconciler<B> {
    pub fn new(
        broker: Arc<B>,
        engine: Arc<OrderEngine<B>>,
        cache: Arc<LiveStateCache>,
        log: EventLogWriter,
        cfg: ReconcileConfig,
    ) -> Self {
        Self {
            broker,
            engine,
            cache,
            log,
            cfg,
        }
    }

    /// Resolve one order against the broker.
    pub async fn reconcile_one(&self, client_order_id: &str) -> ReconcileOutcome {
        let Some(order) = self.engine.order_by_client_id(client_order_id).await else {
            return ReconcileOutcome::Skipped;
        };
        if !matches!(order.state, OrderState::Unknown | OrderState::Cancelling) {
            return ReconcileOutcome::Skipped;
        }

        match self.broker.get_order(client_order_id).await {
            Ok(Some(view)) => {
                let Some(resolution) = resolution_from_view(&view) else {
                    tracing::warn!(
                        client_order_id,
                        status = %view.status,
                        "unrecognized broker status; leaving order for next sweep"
                    );
                    return ReconcileOutcome::Deferred;
                };

                // A live CANCELLING order whose cancel has not registered yet
                // stays CANCELLING; the cancel verdict has not arrived.
                if order.state == OrderState::Cancelling
                    && matches!(
                        resolution.state,
                        OrderState::Submitted | OrderState::PartialFill | OrderState::Cancelling
                    )
                {
                    return ReconcileOutcome::Deferred;
                }
                if resolution.state == order.state {
                    return ReconcileOutcome::Deferred;
                }

                match self.engine.apply_resolution(client_order_id, resolution.clone()).await {
                    Ok(t) => ReconcileOutcome::Resolved(t.to),
                    Err(e) => {
                        tracing::error!(client_order_id, "resolution refused: {e}");
                        ReconcileOutcome::Deferred
                    }
                }
            }
            Ok(None) => {
                // Definitive "not found". Only an UNKNOWN order may fail on
                // this evidence (a CANCELLING order has been seen by the
                // broker before; purged history is not a placement failure).
                if order.state != OrderState::Unknown {
                    return ReconcileOutcome::Deferred;
                }
                // FAILED only after a bounded grace: the broker may still be
                // propagating a just-accepted order.
                let age = match self.engine.note_broker_not_found(client_order_id).await {
                    Ok(age) => age,
                    Err(_) => return ReconcileOutcome::Skipped,
                };
                if age >= self.cfg.not_found_grace {
                    let resolution = Resolution {
                        state: OrderState::Failed,
                        filled_qty: order.filled_qty,
                        avg_fill_price_micros: order.avg_fill_price_micros,
                        broker_ref: order.broker_ref.clone(),
                    };
                    match self.engine.apply_resolution(client_order_id, resolution).await {
                        Ok(t) => ReconcileOutcome::Resolved(t.to),
                        Err(e) => {
                            tracing::error!(client_order_id, "failed-resolution refused: {e}");
                            ReconcileOutcome::Deferred
                        }
                    }
                } else {
                    ReconcileOutcome::Deferred
                }
            }
            Err(e) => {
                tracing::warn!(client_order_id, "broker lookup failed: {e}; deferring");
                ReconcileOutcome::Deferred
            }
        }
    }

    /// Diff LSC positions against the broker and overwrite divergence.
    /// Returns the symbols that were overwritten.
    pub async fn reconcile_positions(&self) -> Vec<String> {
        let broker_positions = match self.broker.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("position fetch failed: {e}; skipping pass");
                return Vec::new();
            }
        };

        let local = self.cache.snapshot().positions;

        // Union of symbols on either side, deterministically ordered.
        let mut symbols: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        symbols.extend(local.keys().cloned());
        symbols.extend(broker_positions.iter().map(|p| p.symbol.clone()));

        let mut overwritten = Vec::new();
        for symbol in symbols {
            let local_qty = local.get(&symbol).map(|p| p.net_qty).unwrap_or(0);
            let broker_view = broker_positions.iter().find(|p| p.symbol == symbol);
            let broker_qty = broker_view.map(|p| p.qty).unwrap_or(0);

            if local_qty == broker_qty {
                continue;
            }

            let avg_micros = broker_view
                .and_then(|p| micros_from_decimal_str(&p.avg_entry_price).ok())
                .unwrap_or(0);

            tracing::warn!(
                %symbol,
                local_qty,
                broker_qty,
                "position divergence; broker is authoritative"
            );

            // Event log before any local overwrite.
            let _ = self.log.append(
                RecordKind::PositionReconciled,
                serde_json::json!({
                    "symbol": symbol,
                    "local_qty": local_qty,
                    "broker_qty": broker_qty,
                    "broker_avg_entry_price": broker_view.map(|p| p.avg_entry_price.clone()),
                }),
            );

            // The engine owns the book; its overwrite publishes the fresh
            // position to the cache (creating the row if the book had never
            // seen this symbol).
            self.engine
                .overwrite_position(&symbol, broker_qty, avg_micros)
                .await;

            overwritten.push(symbol);
        }
        overwritten
    }

    /// One full pass: every UNKNOWN order, then positions.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for cid in self.engine.unknown_orders().await {
            match self.reconcile_one(&cid).await {
                ReconcileOutcome::Resolved(_) => report.orders_resolved += 1,
                ReconcileOutcome::Deferred => report.orders_deferred += 1,
                ReconcileOutcome::Skipped => {}
            }
        }
        report.positions_overwritten = self.reconcile_positions().await;
        report
    }

    /// Stream-reconnect hook: run a full pass before trusting events again.
    pub async fn reconcile_all(&self) -> SweepReport {
        self.sweep().await
    }

    pub fn sweep_interval(&self) -> Duration {
        self.cfg.sweep_interval
    }

    /// Expose the underlying order for scenario assertions.
    pub async fn order(&self, client_order_id: &str) -> Option<Order> {
        self.engine.order_by_client_id(client_order_id).await
    }
}
