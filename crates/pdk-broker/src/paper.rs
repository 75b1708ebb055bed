//! Deterministic in-memory "paper" broker.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - `broker_order_id` is `"paper:{client_order_id}"`.
//! - Submits are idempotent: a repeated `client_order_id` returns the same
//!   response and mutates nothing.
//! - Nothing is auto-generated. Fills, rejects, and cancel confirmations
//!   are explicit injections (`inject_fill`, `inject_reject`,
//!   `confirm_cancel`) that update the order view AND enqueue the matching
//!   stream event, so the paper event feed and the REST view always agree.
//! - No randomness; the event `seq` is a plain counter.

use crate::adapter::{BrokerAdapter, CancelResponse, PlaceOrderRequest, PlaceOrderResponse};
use crate::error::BrokerError;
use chrono::Utc;
use pdk_schemas::{BrokerEvent, BrokerEventKind, BrokerOrderView, BrokerPositionView};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct PaperInner {
    orders: BTreeMap<String, BrokerOrderView>, // keyed by client_order_id
    positions: BTreeMap<String, BrokerPositionView>,
    events: VecDeque<BrokerEvent>,
    seq: u64,
    /// Pre-loaded errors returned by the next place() calls (retry tests).
    place_failures: VecDeque<BrokerError>,
    /// Pre-loaded errors returned by the next get_order() calls.
    lookup_failures: VecDeque<BrokerError>,
    /// When true, place() succeeds at the broker but the caller sees a
    /// timeout: the order exists with no response (UNKNOWN-path tests).
    swallow_next_place: bool,
}

impl PaperInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_event(&mut self, kind: BrokerEventKind, view: &BrokerOrderView, qty: Option<i64>, price: Option<String>, reason: Option<String>) {
        let seq = self.next_seq();
        self.events.push_back(BrokerEvent {
            seq,
            kind,
            order_id: Some(view.broker_order_id.clone()),
            client_order_id: view.client_order_id.clone(),
            qty,
            price,
            reason,
        });
    }
}

#[derive(Default)]
pub struct PaperBroker {
    inner: Mutex<PaperInner>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperInner> {
        self.inner.lock().expect("paper broker mutex poisoned")
    }

    // -- scripted behavior (tests / paper loop) -----------------------------

    /// Queue a classified failure for the next `place` call.
    pub fn fail_next_place(&self, err: BrokerError) {
        self.lock().place_failures.push_back(err);
    }

    /// Queue a classified failure for the next `get_order` call.
    pub fn fail_next_lookup(&self, err: BrokerError) {
        self.lock().lookup_failures.push_back(err);
    }

    /// Accept the next `place` at the broker but answer with a timeout.
    pub fn swallow_next_place(&self) {
        self.lock().swallow_next_place = true;
    }

    /// Acknowledge an accepted order onto the event stream.
    pub fn ack(&self, client_order_id: &str) {
        let mut g = self.lock();
        if let Some(view) = g.orders.get(client_order_id).cloned() {
            g.push_event(BrokerEventKind::Ack, &view, None, None, None);
        }
    }

    /// Execute qty@price against an order: updates the broker view and
    /// emits a fill event. Also moves the broker position.
    pub fn inject_fill(&self, client_order_id: &str, qty: i64, price: &str) {
        let mut g = self.lock();
        let Some(mut view) = g.orders.get(client_order_id).cloned() else {
            return;
        };
        view.filled_qty += qty;
        view.avg_fill_price = price.to_string();
        view.status = if view.filled_qty >= view.qty {
            "filled".to_string()
        } else {
            "partially_filled".to_string()
        };
        g.orders.insert(client_order_id.to_string(), view.clone());

        let signed = view.side.sign() * qty;
        let pos = g
            .positions
            .entry(view.symbol.clone())
            .or_insert_with(|| BrokerPositionView {
                symbol: view.symbol.clone(),
                qty: 0,
                avg_entry_price: price.to_string(),
            });
        pos.qty += signed;
        pos.avg_entry_price = price.to_string();
        if pos.qty == 0 {
            let symbol = view.symbol.clone();
            g.positions.remove(&symbol);
        }

        g.push_event(
            BrokerEventKind::Fill,
            &view,
            Some(qty),
            Some(price.to_string()),
            None,
        );
    }

    /// Reject an order outright.
    pub fn inject_reject(&self, client_order_id: &str, reason: &str) {
        let mut g = self.lock();
        let Some(mut view) = g.orders.get(client_order_id).cloned() else {
            return;
        };
        view.status = "rejected".to_string();
        g.orders.insert(client_order_id.to_string(), view.clone());
        g.push_event(BrokerEventKind::Reject, &view, None, None, Some(reason.to_string()));
    }

    /// Confirm a pending cancel.
    pub fn confirm_cancel(&self, client_order_id: &str) {
        let mut g = self.lock();
        let Some(mut view) = g.orders.get(client_order_id).cloned() else {
            return;
        };
        view.status = "canceled".to_string();
        g.orders.insert(client_order_id.to_string(), view.clone());
        g.push_event(BrokerEventKind::Cancel, &view, None, None, None);
    }

    /// Drain the event stream (the paper-mode stand-in for the WS feed).
    pub fn take_events(&self) -> Vec<BrokerEvent> {
        self.lock().events.drain(..).collect()
    }

    /// Drop an order from the broker book entirely (not-found tests).
    pub fn forget_order(&self, client_order_id: &str) {
        self.lock().orders.remove(client_order_id);
    }

    /// Force a broker-side position (reconciliation divergence tests).
    pub fn set_position(&self, symbol: &str, qty: i64, avg_entry_price: &str) {
        let mut g = self.lock();
        if qty == 0 {
            g.positions.remove(symbol);
        } else {
            g.positions.insert(
                symbol.to_string(),
                BrokerPositionView {
                    symbol: symbol.to_string(),
                    qty,
                    avg_entry_price: avg_entry_price.to_string(),
                },
            );
        }
    }

    /// Count of `POST /orders` the broker has actually accepted.
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }
}

impl BrokerAdapter for PaperBroker {
    async fn place(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderResponse, BrokerError> {
        if req.qty <= 0 {
            return Err(BrokerError::BadRequest(format!(
                "qty must be > 0, got {}",
                req.qty
            )));
        }

        let mut g = self.lock();
        if let Some(err) = g.place_failures.pop_front() {
            return Err(err);
        }

        // Idempotent resubmit: same key, same order, no new side effect.
        if let Some(existing) = g.orders.get(&req.client_order_id) {
            return Ok(PlaceOrderResponse {
                order_id: existing.broker_order_id.clone(),
                status: existing.status.clone(),
            });
        }

        let view = BrokerOrderView {
            broker_order_id: format!("paper:{}", req.client_order_id),
            client_order_id: req.client_order_id.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            qty: req.qty,
            filled_qty: 0,
            avg_fill_price: "0.000000".to_string(),
            status: "accepted".to_string(),
            created_at: Utc::now(),
        };
        g.orders.insert(req.client_order_id.clone(), view.clone());

        if g.swallow_next_place {
            g.swallow_next_place = false;
            return Err(BrokerError::Retriable(
                "timeout waiting for broker response".to_string(),
            ));
        }

        Ok(PlaceOrderResponse {
            order_id: view.broker_order_id,
            status: view.status,
        })
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<CancelResponse, BrokerError> {
        let mut g = self.lock();
        let found = g
            .orders
            .values()
            .find(|v| v.broker_order_id == broker_order_id)
            .cloned();
        match found {
            Some(mut view) if matches!(view.status.as_str(), "accepted" | "partially_filled") => {
                view.status = "pending_cancel".to_string();
                g.orders.insert(view.client_order_id.clone(), view);
                Ok(CancelResponse {
                    status: "pending_cancel".to_string(),
                })
            }
            Some(view) => Ok(CancelResponse {
                status: view.status,
            }),
            None => Err(BrokerError::Fatal(format!(
                "unknown order {broker_order_id}"
            ))),
        }
    }

    async fn get_order(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrderView>, BrokerError> {
        let mut g = self.lock();
        if let Some(err) = g.lookup_failures.pop_front() {
            return Err(err);
        }
        Ok(g.orders.get(client_order_id).cloned())
    }

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrderView>, BrokerError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|v| {
                matches!(
                    v.status.as_str(),
                    "accepted" | "partially_filled" | "pending_cancel"
                )
            })
            .cloned()
            .collect())
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPositionView>, BrokerError> {
        Ok(self.lock().positions.values().cloned().collect())
    }

    async fn cancel_all(&self) -> Result<u32, BrokerError> {
        let mut g = self.lock();
        let open: Vec<BrokerOrderView> = g
            .orders
            .values()
            .filter(|v| {
                matches!(
                    v.status.as_str(),
                    "accepted" | "partially_filled" | "pending_cancel"
                )
            })
            .cloned()
            .collect();
        let n = open.len() as u32;
        for mut view in open {
            view.status = "canceled".to_string();
            g.orders.insert(view.client_order_id.clone(), view.clone());
            g.push_event(BrokerEventKind::Cancel, &view, None, None, None);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_schemas::{OrderType, Side};

    fn req(cid: &str) -> PlaceOrderRequest {
        PlaceOrderRequest {
            client_order_id: cid.to_string(),
            symbol: "AAPL".to_string(),
            qty: 10,
            side: Side::Buy,
            order_type: OrderType::Market,
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn duplicate_place_is_idempotent() {
        let b = PaperBroker::new();
        let r1 = b.place(&req("A")).await.unwrap();
        let r2 = b.place(&req("A")).await.unwrap();
        assert_eq!(r1.order_id, r2.order_id);
        assert_eq!(b.order_count(), 1);
    }

    #[tokio::test]
    async fn fill_updates_view_position_and_stream() {
        let b = PaperBroker::new();
        b.place(&req("A")).await.unwrap();
        b.inject_fill("A", 10, "150.000000");

        let view = b.get_order("A").await.unwrap().unwrap();
        assert_eq!(view.status, "filled");
        assert_eq!(view.filled_qty, 10);

        let pos = b.get_positions().await.unwrap();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].qty, 10);

        let events = b.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, BrokerEventKind::Fill);
        assert_eq!(events[0].qty, Some(10));
    }

    #[tokio::test]
    async fn swallowed_place_exists_without_response() {
        let b = PaperBroker::new();
        b.swallow_next_place();
        let err = b.place(&req("C")).await.unwrap_err();
        assert!(err.is_retriable());
        // The broker accepted it anyway — exactly the UNKNOWN scenario.
        assert!(b.get_order("C").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_all_cancels_open_orders_only() {
        let b = PaperBroker::new();
        b.place(&req("A")).await.unwrap();
        b.place(&req("B")).await.unwrap();
        b.inject_fill("B", 10, "100.000000");

        let n = b.cancel_all().await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(b.get_order("A").await.unwrap().unwrap().status, "canceled");
        assert_eq!(b.get_order("B").await.unwrap().unwrap().status, "filled");
    }

    #[tokio::test]
    async fn event_seq_is_monotonic() {
        let b = PaperBroker::new();
        b.place(&req("A")).await.unwrap();
        b.ack("A");
        b.inject_fill("A", 4, "10.000000");
        b.inject_fill("A", 6, "10.000000");

        let seqs: Vec<u64> = b.take_events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
