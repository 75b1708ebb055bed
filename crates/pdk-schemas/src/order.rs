//! Order domain types: intents, live orders, fills, and the lifecycle
//! state set. Transition legality lives in `pdk-oms`; these types only
//! describe shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side / OrderType
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that unwinds this one (used by flattening orders).
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buy, -1 for sell: multiplier onto signed position quantity.
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

// ---------------------------------------------------------------------------
// OrderState
// ---------------------------------------------------------------------------

/// Lifecycle states of an order.
///
/// Terminal states are retained forever for audit; they are never deleted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Intent accepted locally, not yet sent to the broker.
    Pending,
    /// Accepted by the broker; no fills yet.
    Submitted,
    PartialFill,
    /// Fully filled. **Terminal.**
    Filled,
    /// Cancel requested; awaiting broker confirmation.
    Cancelling,
    /// Cancel confirmed. **Terminal.**
    Cancelled,
    /// Broker rejected the order. **Terminal.**
    Rejected,
    /// No broker evidence within the ack window; owned by the reconciler.
    Unknown,
    /// Unrecoverable local or placement error. **Terminal.**
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Failed
        )
    }

    /// States visible at the broker that a stuck order can rot in.
    pub fn is_zombie_candidate(self) -> bool {
        matches!(self, OrderState::Submitted | OrderState::Cancelling)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Pending => "PENDING",
            OrderState::Submitted => "SUBMITTED",
            OrderState::PartialFill => "PARTIAL_FILL",
            OrderState::Filled => "FILLED",
            OrderState::Cancelling => "CANCELLING",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected => "REJECTED",
            OrderState::Unknown => "UNKNOWN",
            OrderState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// OrderIntent
// ---------------------------------------------------------------------------

/// A risk-approved trading intent, ready for the lifecycle engine.
///
/// `client_order_id` is the caller-supplied idempotency key: two intents with
/// the same key are the same order at the broker, always.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub strategy_id: String,
    pub signal_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    /// Required iff `order_type == Limit`. Micros.
    pub limit_price_micros: Option<i64>,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A tracked order. Created by the lifecycle engine, mutated only through
/// its state machine, never destroyed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Server-generated, time-ordered, unique per process run.
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price_micros: Option<i64>,
    pub state: OrderState,
    pub filled_qty: i64,
    /// Quantity-weighted average fill price; 0 while unfilled. Micros.
    pub avg_fill_price_micros: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub strategy_id: String,
    pub signal_id: String,
    /// Broker-assigned order id; None until the broker accepts.
    pub broker_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// An immutable broker execution confirmation. `Σ fills.qty` for an order
/// always equals that order's `filled_qty`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub qty: i64,
    pub price_micros: i64,
    pub fees_micros: i64,
    pub ts: DateTime<Utc>,
}
