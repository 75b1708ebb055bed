//! The async Order Lifecycle Engine.
//!
//! Ownership: the engine holds the per-order records (behind per-order
//! locks keyed by `client_order_id`), the position book, and the mark map.
//! The broker stream, the reconciler, and the decision loop are all just
//! callers — they never talk to each other directly.
//!
//! Write ordering, enforced here: state machine first (in memory), then
//! the event log, then the live-state cache, then the dirty signal the
//! broadcast pump listens to. Every `ORDER_TRANSITION` therefore reaches
//! the log before any observer can see the new state.

use crate::backoff::{backoff_delay, RetryPolicy};
use crate::errors::OmsError;
use crate::ids::OrderIdGen;
use crate::state_machine::{OrderEvent, OrderRecord, Resolution, Transition};
use chrono::Utc;
use pdk_broker::{BrokerAdapter, PlaceOrderRequest};
use pdk_cache::{logical_ts_now, LiveStateCache, Stamped};
use pdk_eventlog::{EventLogWriter, RecordKind};
use pdk_portfolio::{MarkMap, Micros, PositionBook};
use pdk_schemas::{
    map_broker_status, micros_from_decimal_str, micros_to_decimal_string, BrokerEvent,
    BrokerEventKind, EquityPoint, Fill, Order, OrderIntent, OrderState, OrderType, Position,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

// ---------------------------------------------------------------------------
// Config / outputs
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct OmsConfig {
    /// No broker evidence within this window after placement => UNKNOWN.
    pub ack_timeout: Duration,
    /// SUBMITTED|CANCELLING older than this escalates as a zombie.
    pub zombie_timeout: Duration,
    pub retry: RetryPolicy,
    pub start_cash: Micros,
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(3),
            zombie_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            start_cash: Micros::from_units(100_000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderHandle {
    pub order_id: String,
    pub client_order_id: String,
    pub state: OrderState,
}

/// Consistent read for the broadcast bus.
#[derive(Clone, Debug)]
pub struct EngineSnapshot {
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub equity: EquityPoint,
}

// ---------------------------------------------------------------------------
// OrderEngine
// ---------------------------------------------------------------------------

pub struct OrderEngine<B: BrokerAdapter> {
    broker: Arc<B>,
    log: EventLogWriter,
    cache: Arc<LiveStateCache>,
    cfg: OmsConfig,
    ids: OrderIdGen,
    /// client_order_id -> record. The inner mutex is the per-order lock
    /// that serializes that order's lifecycle.
    orders: Mutex<HashMap<String, Arc<Mutex<OrderRecord>>>>,
    /// order_id -> client_order_id.
    order_index: Mutex<HashMap<String, String>>,
    book: Mutex<PositionBook>,
    marks: Mutex<MarkMap>,
    /// Version tie-break for cache stamps; monotonic per process.
    stamp_version: AtomicU64,
    dirty: watch::Sender<u64>,
}

impl<B: BrokerAdapter> OrderEngine<B> {
    pub fn new(
        broker: Arc<B>,
        log: EventLogWriter,
        cache: Arc<LiveStateCache>,
        cfg: OmsConfig,
    ) -> Self {
        let start_cash = cfg.start_cash;
        let (dirty, _) = watch::channel(0u64);
        Self {
            broker,
            log,
            cache,
            cfg,
            ids: OrderIdGen::new(),
            orders: Mutex::new(HashMap::new()),
            order_index: Mutex::new(HashMap::new()),
            book: Mutex::new(PositionBook::with_cash(start_cash)),
            marks: Mutex::new(MarkMap::new()),
            stamp_version: AtomicU64::new(1),
            dirty,
        }
    }

    /// Observers subscribe here; the value bumps after every visible change.
    pub fn subscribe_dirty(&self) -> watch::Receiver<u64> {
        self.dirty.subscribe()
    }

    // -- submit -------------------------------------------------------------

    /// Translate a risk-approved intent into a broker order.
    ///
    /// Idempotent on `client_order_id`: a repeated intent returns the
    /// existing handle without any broker side effect.
    pub async fn submit(&self, intent: OrderIntent) -> Result<OrderHandle, OmsError> {
        if self.cache.halt_active() {
            return Err(OmsError::HaltActive);
        }
        if intent.qty <= 0 {
            return Err(OmsError::BadRequest(format!(
                "qty must be > 0, got {}",
                intent.qty
            )));
        }
        if intent.order_type == OrderType::Limit && intent.limit_price_micros.is_none() {
            return Err(OmsError::BadRequest(
                "limit order requires limit_price".to_string(),
            ));
        }

        let rec = {
            let mut map = self.orders.lock().await;
            if let Some(existing) = map.get(&intent.client_order_id) {
                let g = existing.lock().await;
                return Ok(handle_of(&g.order));
            }

            let now = Utc::now();
            let order = Order {
                order_id: self.ids.next(),
                client_order_id: intent.client_order_id.clone(),
                symbol: intent.symbol.clone(),
                side: intent.side,
                qty: intent.qty,
                order_type: intent.order_type,
                limit_price_micros: intent.limit_price_micros,
                state: OrderState::Pending,
                filled_qty: 0,
                avg_fill_price_micros: 0,
                created_at: now,
                updated_at: now,
                strategy_id: intent.strategy_id.clone(),
                signal_id: intent.signal_id.clone(),
                broker_ref: None,
            };

            // Event log first, always.
            self.log
                .append(
                    RecordKind::OrderCreated,
                    serde_json::to_value(&order).expect("order serializes"),
                )
                .map_err(|e| OmsError::Internal(format!("event log append: {e:#}")))?;

            let rec = Arc::new(Mutex::new(OrderRecord::new(order.clone())));
            map.insert(intent.client_order_id.clone(), rec.clone());
            drop(map);

            self.order_index
                .lock()
                .await
                .insert(order.order_id.clone(), intent.client_order_id.clone());
            self.put_order_cache(&order);
            self.bump();
            rec
        };

        self.place_with_retry(&rec).await
    }

    async fn place_with_retry(&self, rec: &Arc<Mutex<OrderRecord>>) -> Result<OrderHandle, OmsError> {
        let (req, cid) = {
            let mut g = rec.lock().await;
            g.placed_at = Some(Utc::now());
            let o = &g.order;
            (
                PlaceOrderRequest {
                    client_order_id: o.client_order_id.clone(),
                    symbol: o.symbol.clone(),
                    qty: o.qty,
                    side: o.side,
                    order_type: o.order_type,
                    limit_price: o.limit_price_micros.map(micros_to_decimal_string),
                },
                g.order.client_order_id.clone(),
            )
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.broker.place(&req).await {
                Ok(resp) => {
                    let event = match map_broker_status(&resp.status) {
                        Some(OrderState::Rejected) => OrderEvent::BrokerRejected {
                            reason: resp.status,
                        },
                        _ => OrderEvent::BrokerAck {
                            broker_ref: resp.order_id,
                        },
                    };
                    self.apply_event(rec, &event, Some(&format!("place-{cid}")))
                        .await?;
                    break;
                }
                Err(e) if e.is_retriable() && attempt < self.cfg.retry.max_attempts => {
                    tracing::warn!(
                        client_order_id = %cid,
                        attempt,
                        "placement retriable failure: {e}; backing off"
                    );
                    tokio::time::sleep(backoff_delay(&self.cfg.retry, attempt)).await;
                }
                Err(e) if e.is_retriable() => {
                    // Out of attempts with no definitive answer. The broker
                    // may hold any of them; never assume failure.
                    tracing::warn!(client_order_id = %cid, "placement exhausted retries: {e}");
                    self.apply_event(
                        rec,
                        &OrderEvent::MarkUnknown,
                        Some(&format!("place-timeout-{cid}")),
                    )
                    .await?;
                    break;
                }
                Err(pdk_broker::BrokerError::BadRequest(reason)) => {
                    self.apply_event(
                        rec,
                        &OrderEvent::LocalFailure { reason },
                        Some(&format!("place-fail-{cid}")),
                    )
                    .await?;
                    break;
                }
                Err(pdk_broker::BrokerError::Fatal(reason)) => {
                    // The broker saw the order and refused it.
                    self.apply_event(
                        rec,
                        &OrderEvent::BrokerRejected { reason },
                        Some(&format!("place-reject-{cid}")),
                    )
                    .await?;
                    break;
                }
                Err(pdk_broker::BrokerError::Retriable(_)) => unreachable!("guarded above"),
            }
        }

        let g = rec.lock().await;
        Ok(handle_of(&g.order))
    }

    // -- cancel -------------------------------------------------------------

    /// Request cancellation. Legal only from SUBMITTED | PARTIAL_FILL.
    pub async fn cancel(&self, id: &str) -> Result<OrderHandle, OmsError> {
        let rec = self
            .record_by_any_id(id)
            .await
            .ok_or_else(|| OmsError::UnknownOrder(id.to_string()))?;

        let (order_id, broker_ref) = {
            let g = rec.lock().await;
            match g.order.state {
                OrderState::Submitted | OrderState::PartialFill => {}
                state => {
                    return Err(OmsError::NotCancellable {
                        order_id: g.order.order_id.clone(),
                        state,
                    })
                }
            }
            (g.order.order_id.clone(), g.order.broker_ref.clone())
        };

        self.apply_event(
            &rec,
            &OrderEvent::CancelRequested,
            Some(&format!("cancel-req-{order_id}")),
        )
        .await?;

        // Fire the broker cancel. Failures leave the order CANCELLING; the
        // reconciler (or the zombie escalation) owns it from there.
        if let Some(bref) = broker_ref {
            if let Err(e) = self.broker.cancel(&bref).await {
                tracing::warn!(order_id = %order_id, "broker cancel failed: {e}");
            }
        }

        let g = rec.lock().await;
        Ok(handle_of(&g.order))
    }

    // -- broker events ------------------------------------------------------

    /// Feed one stream event through the state machine. Deduplicated by
    /// stream seq, so a replayed frame is a no-op.
    pub async fn on_broker_event(&self, ev: &BrokerEvent) -> Result<(), OmsError> {
        let rec = self
            .record_by_client_id(&ev.client_order_id)
            .await
            .ok_or_else(|| OmsError::UnknownOrder(ev.client_order_id.clone()))?;

        let event_id = format!("stream-{}", ev.seq);
        let event = match ev.kind {
            BrokerEventKind::Ack => OrderEvent::BrokerAck {
                broker_ref: ev.order_id.clone().unwrap_or_default(),
            },
            BrokerEventKind::Fill => {
                let qty = ev
                    .qty
                    .ok_or_else(|| OmsError::BadRequest("fill frame without qty".into()))?;
                let price = ev
                    .price
                    .as_deref()
                    .ok_or_else(|| OmsError::BadRequest("fill frame without price".into()))?;
                let price_micros = micros_from_decimal_str(price)
                    .map_err(|e| OmsError::BadRequest(e.to_string()))?;
                let order_id = rec.lock().await.order.order_id.clone();
                OrderEvent::BrokerFill {
                    fill: Fill {
                        fill_id: format!("fill-{}-{}", ev.client_order_id, ev.seq),
                        order_id,
                        qty,
                        price_micros,
                        fees_micros: 0,
                        ts: Utc::now(),
                    },
                }
            }
            BrokerEventKind::Cancel => OrderEvent::BrokerCancelled,
            BrokerEventKind::Reject => OrderEvent::BrokerRejected {
                reason: ev.reason.clone().unwrap_or_default(),
            },
            BrokerEventKind::Unknown => OrderEvent::MarkUnknown,
        };

        self.apply_event(&rec, &event, Some(&event_id)).await.map(|_| ())
    }

    // -- reconciler surface -------------------------------------------------

    /// Orders currently owned by the reconciler.
    pub async fn unknown_orders(&self) -> Vec<String> {
        let map = self.orders.lock().await;
        let mut out = Vec::new();
        for (cid, rec) in map.iter() {
            if rec.lock().await.order.state == OrderState::Unknown {
                out.push(cid.clone());
            }
        }
        out
    }

    pub async fn order_by_client_id(&self, cid: &str) -> Option<Order> {
        let rec = self.record_by_client_id(cid).await?;
        let g = rec.lock().await;
        Some(g.order.clone())
    }

    /// Apply a reconciler verdict built from broker truth.
    pub async fn apply_resolution(
        &self,
        cid: &str,
        resolution: Resolution,
    ) -> Result<Transition, OmsError> {
        let rec = self
            .record_by_client_id(cid)
            .await
            .ok_or_else(|| OmsError::UnknownOrder(cid.to_string()))?;
        self.apply_event(&rec, &OrderEvent::ReconcileResolved { resolution }, None)
            .await
    }

    /// Track how long the broker has answered "not found" for an UNKNOWN
    /// order. Returns the age of the first such answer.
    pub async fn note_broker_not_found(&self, cid: &str) -> Result<Duration, OmsError> {
        let rec = self
            .record_by_client_id(cid)
            .await
            .ok_or_else(|| OmsError::UnknownOrder(cid.to_string()))?;
        let mut g = rec.lock().await;
        let now = Utc::now();
        let since = *g.not_found_since.get_or_insert(now);
        Ok((now - since).to_std().unwrap_or_default())
    }

    /// Broker-authoritative position overwrite. The caller (reconciler)
    /// writes `POSITION_RECONCILED` to the event log BEFORE calling this.
    pub async fn overwrite_position(&self, symbol: &str, net_qty: i64, avg_cost_micros: i64) {
        let now = Utc::now();
        {
            let mut book = self.book.lock().await;
            book.overwrite_position(symbol, net_qty, Micros::new(avg_cost_micros), now);
        }
        self.publish_positions().await;
        self.bump();
    }

    // -- timers -------------------------------------------------------------

    /// One pass of the timeout policies. Returns the ids escalated as
    /// zombies this pass (already written to the event log).
    pub async fn scan_timeouts(&self) -> Vec<String> {
        let now = Utc::now();
        let records: Vec<Arc<Mutex<OrderRecord>>> = {
            let map = self.orders.lock().await;
            map.values().cloned().collect()
        };

        let mut zombies = Vec::new();
        for rec in records {
            enum Action {
                None,
                MarkUnknown(String),
                Zombie(String, OrderState, i64),
            }

            let action = {
                let mut g = rec.lock().await;
                let age = now - g.order.created_at;
                let ack_deadline =
                    chrono::Duration::from_std(self.cfg.ack_timeout).unwrap_or_default();
                let zombie_deadline =
                    chrono::Duration::from_std(self.cfg.zombie_timeout).unwrap_or_default();

                if g.order.state == OrderState::Pending && age > ack_deadline {
                    Action::MarkUnknown(g.order.client_order_id.clone())
                } else if g.order.state.is_zombie_candidate()
                    && age > zombie_deadline
                    && !g.zombie_flagged
                {
                    g.zombie_flagged = true;
                    Action::Zombie(g.order.order_id.clone(), g.order.state, age.num_seconds())
                } else {
                    Action::None
                }
            };

            match action {
                Action::None => {}
                Action::MarkUnknown(cid) => {
                    if let Err(e) = self
                        .apply_event(&rec, &OrderEvent::MarkUnknown, Some(&format!("ack-timeout-{cid}")))
                        .await
                    {
                        tracing::warn!("ack-timeout apply failed: {e}");
                    }
                }
                Action::Zombie(order_id, state, age_secs) => {
                    let _ = self.log.append(
                        RecordKind::Metric,
                        serde_json::json!({
                            "metric": "zombie_order",
                            "order_id": order_id,
                            "state": state.to_string(),
                            "age_secs": age_secs,
                        }),
                    );
                    zombies.push(order_id);
                }
            }
        }
        zombies
    }

    // -- marks / equity ------------------------------------------------------

    /// Latest close per symbol, fed by the bar stream.
    pub async fn update_marks(&self, updates: &[(String, i64)]) {
        let mut marks = self.marks.lock().await;
        for (symbol, price_micros) in updates {
            marks.insert(symbol.clone(), Micros::new(*price_micros));
        }
    }

    /// Recompute equity, write it to the event log and the cache.
    pub async fn publish_equity(&self) -> EquityPoint {
        let now = Utc::now();
        let point = {
            let marks = self.marks.lock().await;
            let mut book = self.book.lock().await;
            book.mark_to_market(&marks, now);
            book.equity_point(&marks, now)
        };

        let _ = self.log.append(
            RecordKind::Metric,
            serde_json::json!({
                "metric": "equity",
                "equity": micros_to_decimal_string(point.equity_micros),
                "cash": micros_to_decimal_string(point.cash_micros),
                "positions_value": micros_to_decimal_string(point.positions_value_micros),
            }),
        );
        self.cache.put_equity(self.stamp(point.clone()));
        self.publish_positions().await;
        self.bump();
        point
    }

    // -- snapshot ------------------------------------------------------------

    /// Consistent read for observers: orders, positions, equity.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let records: Vec<Arc<Mutex<OrderRecord>>> = {
            let map = self.orders.lock().await;
            map.values().cloned().collect()
        };
        let mut orders = Vec::with_capacity(records.len());
        for rec in records {
            orders.push(rec.lock().await.order.clone());
        }
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));

        let now = Utc::now();
        let (positions, equity) = {
            let marks = self.marks.lock().await;
            let book = self.book.lock().await;
            (book.to_schema_positions(), book.equity_point(&marks, now))
        };

        EngineSnapshot {
            orders,
            positions,
            equity,
        }
    }

    pub async fn open_order_count(&self) -> usize {
        let map = self.orders.lock().await;
        let mut n = 0;
        for rec in map.values() {
            if !rec.lock().await.order.state.is_terminal() {
                n += 1;
            }
        }
        n
    }

    // -- internals -----------------------------------------------------------

    async fn record_by_client_id(&self, cid: &str) -> Option<Arc<Mutex<OrderRecord>>> {
        self.orders.lock().await.get(cid).cloned()
    }

    async fn record_by_any_id(&self, id: &str) -> Option<Arc<Mutex<OrderRecord>>> {
        if let Some(rec) = self.record_by_client_id(id).await {
            return Some(rec);
        }
        let cid = self.order_index.lock().await.get(id).cloned()?;
        self.record_by_client_id(&cid).await
    }

    /// Apply one event under the per-order lock, then log and publish.
    async fn apply_event(
        &self,
        rec: &Arc<Mutex<OrderRecord>>,
        event: &OrderEvent,
        event_id: Option<&str>,
    ) -> Result<Transition, OmsError> {
        let now = Utc::now();
        let (transition, order, fill) = {
            let mut g = rec.lock().await;
            let fill = match event {
                OrderEvent::BrokerFill { fill } => Some(fill.clone()),
                _ => None,
            };
            match g.apply(event, event_id, now) {
                Ok(t) => (t, g.order.clone(), fill),
                Err(violation) => {
                    // Rejected and recorded; the order is untouched.
                    let _ = self.log.append(
                        RecordKind::Metric,
                        serde_json::json!({
                            "metric": "invariant_violation",
                            "order_id": violation.order_id,
                            "from": violation.from.to_string(),
                            "event": violation.event,
                        }),
                    );
                    tracing::error!("{violation}");
                    return Err(violation.into());
                }
            }
        };

        if !transition.changed {
            return Ok(transition);
        }

        // Event log precedes every cache write and broadcast.
        if let Some(f) = &fill {
            self.log
                .append(
                    RecordKind::Fill,
                    serde_json::json!({
                        "fill": f,
                        "symbol": order.symbol,
                        "side": order.side,
                    }),
                )
                .map_err(|e| OmsError::Internal(format!("event log append: {e:#}")))?;
        }
        self.log
            .append(
                RecordKind::OrderTransition,
                serde_json::json!({
                    "order_id": order.order_id,
                    "client_order_id": order.client_order_id,
                    "from": transition.from.to_string(),
                    "to": transition.to.to_string(),
                    "filled_qty": order.filled_qty,
                    "avg_fill_price": micros_to_decimal_string(order.avg_fill_price_micros),
                }),
            )
            .map_err(|e| OmsError::Internal(format!("event log append: {e:#}")))?;

        self.put_order_cache(&order);

        if let Some(f) = fill {
            let mut book = self.book.lock().await;
            book.apply_fill(
                &order.symbol,
                order.side,
                f.qty,
                Micros::new(f.price_micros),
                Micros::new(f.fees_micros),
                f.ts,
            )
            .map_err(|e| OmsError::Internal(e.to_string()))?;
            drop(book);
            self.publish_positions().await;
        }

        self.bump();
        Ok(transition)
    }

    async fn publish_positions(&self) {
        let positions = {
            let book = self.book.lock().await;
            book.to_schema_positions()
        };
        for p in positions {
            self.cache.put_position(self.stamp(p));
        }
    }

    fn put_order_cache(&self, order: &Order) {
        self.cache.put_order(self.stamp(order.clone()));
    }

    fn stamp<T>(&self, data: T) -> Stamped<T> {
        Stamped::new(
            logical_ts_now(),
            self.stamp_version.fetch_add(1, Ordering::Relaxed),
            data,
        )
    }

    fn bump(&self) {
        self.dirty.send_modify(|v| *v += 1);
    }
}

fn handle_of(order: &Order) -> OrderHandle {
    OrderHandle {
        order_id: order.order_id.clone(),
        client_order_id: order.client_order_id.clone(),
        state: order.state,
    }
}
