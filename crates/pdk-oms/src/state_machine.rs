//! Per-order state machine.
//!
//! Every lifecycle event is applied via [`OrderRecord::apply`], which
//! enforces two invariants:
//!
//! 1. **Legal transitions only.** An illegal event returns
//!    [`InvalidTransition`]; the order does not change. Callers record the
//!    violation and raise an alarm: an illegal transition means the OMS
//!    and the broker disagree about reality.
//! 2. **Idempotent replay.** When an `event_id` is supplied and has been
//!    applied before, the call is a silent no-op. Replaying a stream or a
//!    log converges to the same state.
//!
//! Legal graph:
//!
//! ```text
//! PENDING      -> SUBMITTED | REJECTED | FAILED | UNKNOWN*
//! SUBMITTED    -> PARTIAL_FILL | FILLED | CANCELLING | REJECTED | UNKNOWN
//! PARTIAL_FILL -> PARTIAL_FILL | FILLED | CANCELLING | UNKNOWN
//! CANCELLING   -> CANCELLED | FILLED | PARTIAL_FILL | UNKNOWN
//! UNKNOWN      -> SUBMITTED | PARTIAL_FILL | FILLED | CANCELLED
//!               | REJECTED | FAILED          (resolution events only)
//! any live     -> FAILED                      (unrecoverable local error)
//! ```
//!
//! (*) PENDING -> UNKNOWN covers placement attempts that timed out with no
//! response: the broker may hold the order, so assuming failure is unsafe.
//! Fills arriving while CANCELLING are accepted and accumulated (the
//! broker may execute before it processes the cancel); the order leaves
//! CANCELLING only on cancel confirmation, completion, or resolution.

use chrono::{DateTime, Utc};
use pdk_schemas::{Fill, Order, OrderState};
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Inputs to the state machine. Broker evidence, local decisions, and
/// reconciler resolutions all funnel through here.
#[derive(Clone, Debug, PartialEq)]
pub enum OrderEvent {
    /// Broker accepted the order (HTTP response or stream ack).
    BrokerAck { broker_ref: String },
    /// An execution arrived.
    BrokerFill { fill: Fill },
    /// Broker confirmed the cancel.
    BrokerCancelled,
    /// Broker rejected the order.
    BrokerRejected { reason: String },
    /// The engine asked the broker to cancel.
    CancelRequested,
    /// No broker evidence inside the ack window (or the stream flagged the
    /// order unknown). Hands ownership to the reconciler.
    MarkUnknown,
    /// Unrecoverable local error.
    LocalFailure { reason: String },
    /// Reconciler verdict, built from broker truth only.
    ReconcileResolved { resolution: Resolution },
}

/// What the reconciler concluded from the broker's answer.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub state: OrderState,
    pub filled_qty: i64,
    pub avg_fill_price_micros: i64,
    pub broker_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// InvalidTransition
// ---------------------------------------------------------------------------

/// An event that is illegal in the order's current state. The order is
/// unchanged; callers MUST record this and raise an alarm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub order_id: String,
    pub from: OrderState,
    pub event: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal transition for {}: {} + {}",
            self.order_id, self.from, self.event
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Outcome of a successful `apply`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderState,
    pub to: OrderState,
    /// False when the event was a deduplicated replay.
    pub changed: bool,
}

// ---------------------------------------------------------------------------
// OrderRecord
// ---------------------------------------------------------------------------

/// An order plus its fills and the engine-side tracking the lifecycle
/// policies need (ack window, zombie escalation, not-found grace).
#[derive(Clone, Debug)]
pub struct OrderRecord {
    pub order: Order,
    pub fills: Vec<Fill>,
    /// When the first placement attempt went out.
    pub placed_at: Option<DateTime<Utc>>,
    /// Last time any broker evidence arrived for this order.
    pub last_broker_event_at: Option<DateTime<Utc>>,
    /// Set when the broker first answered "not found" while UNKNOWN.
    pub not_found_since: Option<DateTime<Utc>>,
    /// The zombie escalation fired (emit once, not every scan).
    pub zombie_flagged: bool,
    applied: HashSet<String>,
}

impl OrderRecord {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            fills: Vec::new(),
            placed_at: None,
            last_broker_event_at: None,
            not_found_since: None,
            zombie_flagged: false,
            applied: HashSet::new(),
        }
    }

    /// Apply one event.
    ///
    /// `event_id` — when `Some`, deduplicated against already-applied ids;
    /// a duplicate returns `changed: false` without touching state.
    pub fn apply(
        &mut self,
        event: &OrderEvent,
        event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Transition, InvalidTransition> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(Transition {
                    from: self.order.state,
                    to: self.order.state,
                    changed: false,
                });
            }
        }

        let from = self.order.state;
        let to = self.do_transition(event, now)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }

        self.order.state = to;
        self.order.updated_at = now;
        if matches!(
            event,
            OrderEvent::BrokerAck { .. }
                | OrderEvent::BrokerFill { .. }
                | OrderEvent::BrokerCancelled
                | OrderEvent::BrokerRejected { .. }
        ) {
            self.last_broker_event_at = Some(now);
        }

        Ok(Transition {
            from,
            to,
            changed: true,
        })
    }

    fn illegal(&self, event: &OrderEvent) -> InvalidTransition {
        InvalidTransition {
            order_id: self.order.order_id.clone(),
            from: self.order.state,
            event: format!("{event:?}"),
        }
    }

    fn do_transition(
        &mut self,
        event: &OrderEvent,
        now: DateTime<Utc>,
    ) -> Result<OrderState, InvalidTransition> {
        use OrderEvent::*;
        use OrderState::*;

        let state = self.order.state;
        Ok(match (state, event) {
            // -- acceptance ----------------------------------------------------
            (Pending, BrokerAck { broker_ref }) => {
                self.order.broker_ref = Some(broker_ref.clone());
                Submitted
            }
            // Ack is idempotent on an already-live order; it can also be the
            // evidence that resolves UNKNOWN back to live.
            (Submitted | PartialFill, BrokerAck { broker_ref }) => {
                if self.order.broker_ref.is_none() {
                    self.order.broker_ref = Some(broker_ref.clone());
                }
                state
            }
            (Unknown, BrokerAck { broker_ref }) => {
                if self.order.broker_ref.is_none() {
                    self.order.broker_ref = Some(broker_ref.clone());
                }
                Submitted
            }

            // -- fills ---------------------------------------------------------
            (Submitted | PartialFill | Cancelling | Unknown, BrokerFill { fill }) => {
                self.accumulate_fill(fill, event)?;
                if self.order.filled_qty == self.order.qty {
                    Filled
                } else if state == Cancelling {
                    // Still waiting on the cancel verdict for the remainder.
                    Cancelling
                } else {
                    PartialFill
                }
            }

            // -- cancel flow ---------------------------------------------------
            (Submitted | PartialFill, CancelRequested) => Cancelling,
            (Cancelling, BrokerCancelled) => Cancelled,
            (Unknown, BrokerCancelled) => Cancelled,

            // -- rejection -----------------------------------------------------
            (Pending | Submitted | Unknown, BrokerRejected { .. }) => Rejected,

            // -- evidence loss -------------------------------------------------
            (Pending | Submitted | PartialFill | Cancelling, MarkUnknown) => Unknown,

            // -- local failure (any live state) --------------------------------
            (
                Pending | Submitted | PartialFill | Cancelling | Unknown,
                LocalFailure { .. },
            ) => Failed,

            // -- reconciler resolution ----------------------------------------
            (Unknown, ReconcileResolved { resolution })
                if matches!(
                    resolution.state,
                    Submitted | PartialFill | Filled | Cancelled | Rejected | Failed
                ) =>
            {
                self.adopt_resolution(resolution, now);
                resolution.state
            }
            (Cancelling, ReconcileResolved { resolution })
                if matches!(resolution.state, Cancelled | Filled | PartialFill) =>
            {
                self.adopt_resolution(resolution, now);
                resolution.state
            }

            _ => return Err(self.illegal(event)),
        })
    }

    fn accumulate_fill(
        &mut self,
        fill: &Fill,
        event: &OrderEvent,
    ) -> Result<(), InvalidTransition> {
        // filled_qty <= qty must hold at every observation.
        if fill.qty <= 0 || self.order.filled_qty + fill.qty > self.order.qty {
            return Err(self.illegal(event));
        }

        let prev_qty = self.order.filled_qty;
        let new_qty = prev_qty + fill.qty;
        // Quantity-weighted average via i128, then back down.
        let num = (self.order.avg_fill_price_micros as i128) * (prev_qty as i128)
            + (fill.price_micros as i128) * (fill.qty as i128);
        let avg = num / (new_qty as i128);
        self.order.avg_fill_price_micros =
            i64::try_from(avg).map_err(|_| self.illegal(event))?;
        self.order.filled_qty = new_qty;
        self.fills.push(fill.clone());
        Ok(())
    }

    /// Adopt broker truth wholesale. The reconciler never invents fills,
    /// so quantities are overwritten, not accumulated.
    fn adopt_resolution(&mut self, r: &Resolution, now: DateTime<Utc>) {
        self.order.filled_qty = r.filled_qty;
        self.order.avg_fill_price_micros = r.avg_fill_price_micros;
        if self.order.broker_ref.is_none() {
            self.order.broker_ref = r.broker_ref.clone();
        }
        self.last_broker_event_at = Some(now);
        self.not_found_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pdk_schemas::{OrderType, Side};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    fn record(qty: i64) -> OrderRecord {
        OrderRecord::new(Order {
            order_id: "ord-1".into(),
            client_order_id: "cid-1".into(),
            symbol: "AAPL".into(),
            side: Side::Buy,
            qty,
            order_type: OrderType::Market,
            limit_price_micros: None,
            state: OrderState::Pending,
            filled_qty: 0,
            avg_fill_price_micros: 0,
            created_at: now(),
            updated_at: now(),
            strategy_id: "strat".into(),
            signal_id: "sig".into(),
            broker_ref: None,
        })
    }

    fn fill(id: &str, qty: i64, price_micros: i64) -> OrderEvent {
        OrderEvent::BrokerFill {
            fill: Fill {
                fill_id: id.into(),
                order_id: "ord-1".into(),
                qty,
                price_micros,
                fees_micros: 0,
                ts: now(),
            },
        }
    }

    fn ack() -> OrderEvent {
        OrderEvent::BrokerAck {
            broker_ref: "X".into(),
        }
    }

    #[test]
    fn happy_path_pending_to_filled() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Submitted);
        assert_eq!(r.order.broker_ref.as_deref(), Some("X"));

        r.apply(&fill("f1", 10, 150_000_000), Some("f1"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Filled);
        assert_eq!(r.order.filled_qty, 10);
        assert_eq!(r.order.avg_fill_price_micros, 150_000_000);
    }

    #[test]
    fn partial_fills_weight_the_average() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        r.apply(&fill("f1", 4, 100_000_000), Some("f1"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::PartialFill);
        r.apply(&fill("f2", 6, 200_000_000), Some("f2"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Filled);
        assert_eq!(r.order.avg_fill_price_micros, 160_000_000);
        assert_eq!(r.fills.len(), 2);
    }

    #[test]
    fn replayed_fill_does_not_double_apply() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        r.apply(&fill("f1", 4, 100_000_000), Some("f1"), now()).unwrap();
        let t = r.apply(&fill("f1", 4, 100_000_000), Some("f1"), now()).unwrap();
        assert!(!t.changed);
        assert_eq!(r.order.filled_qty, 4);
    }

    #[test]
    fn overfill_is_rejected_without_mutation() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        r.apply(&fill("f1", 8, 100_000_000), Some("f1"), now()).unwrap();
        let err = r
            .apply(&fill("f2", 5, 100_000_000), Some("f2"), now())
            .unwrap_err();
        assert_eq!(err.from, OrderState::PartialFill);
        assert_eq!(r.order.filled_qty, 8);
        assert_eq!(r.order.state, OrderState::PartialFill);
    }

    #[test]
    fn cancel_flow_partial_then_cancelled() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        r.apply(&fill("f1", 6, 200_000_000), Some("f1"), now()).unwrap();
        r.apply(&OrderEvent::CancelRequested, Some("c1"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Cancelling);
        r.apply(&OrderEvent::BrokerCancelled, Some("c2"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Cancelled);
        assert_eq!(r.order.filled_qty, 6);
    }

    #[test]
    fn fill_while_cancelling_accumulates() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        r.apply(&OrderEvent::CancelRequested, Some("c1"), now()).unwrap();
        r.apply(&fill("f1", 10, 100_000_000), Some("f1"), now()).unwrap();
        // Full fill wins the race against the cancel.
        assert_eq!(r.order.state, OrderState::Filled);
    }

    #[test]
    fn unknown_resolves_via_reconciler_only_evidence() {
        let mut r = record(5);
        r.apply(&OrderEvent::MarkUnknown, Some("t1"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Unknown);

        let res = OrderEvent::ReconcileResolved {
            resolution: Resolution {
                state: OrderState::Filled,
                filled_qty: 5,
                avg_fill_price_micros: 101_100_000,
                broker_ref: Some("X".into()),
            },
        };
        r.apply(&res, Some("r1"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Filled);
        assert_eq!(r.order.filled_qty, 5);
        assert_eq!(r.order.avg_fill_price_micros, 101_100_000);
    }

    #[test]
    fn terminal_states_refuse_everything() {
        let mut r = record(10);
        r.apply(&ack(), Some("a1"), now()).unwrap();
        r.apply(&fill("f1", 10, 100_000_000), Some("f1"), now()).unwrap();
        assert!(r.apply(&OrderEvent::CancelRequested, Some("c"), now()).is_err());
        assert!(r.apply(&OrderEvent::MarkUnknown, Some("u"), now()).is_err());
        assert_eq!(r.order.state, OrderState::Filled);
    }

    #[test]
    fn pending_rejected_and_failed() {
        let mut r = record(10);
        let e = OrderEvent::BrokerRejected {
            reason: "no buying power".into(),
        };
        r.apply(&e, Some("x"), now()).unwrap();
        assert_eq!(r.order.state, OrderState::Rejected);

        let mut r2 = record(10);
        r2.apply(
            &OrderEvent::LocalFailure {
                reason: "event log unwritable".into(),
            },
            Some("y"),
            now(),
        )
        .unwrap();
        assert_eq!(r2.order.state, OrderState::Failed);
    }
}
