//! Broker wire shapes: the stream frame and the REST read views.
//!
//! Monetary fields stay decimal strings on the wire (exactly what the broker
//! sends); convert at the edge with [`crate::micros_from_decimal_str`].

use crate::order::{OrderState, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stream frames
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerEventKind {
    Ack,
    Fill,
    Cancel,
    Reject,
    Unknown,
}

/// One JSON frame from the broker event stream. `seq` is monotonic per
/// broker session and drives resume-on-reconnect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEvent {
    pub seq: u64,
    pub kind: BrokerEventKind,
    /// Broker-assigned order id; absent on some reject frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub client_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<i64>,
    /// Decimal string, e.g. "150.000000".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// REST read views
// ---------------------------------------------------------------------------

/// Broker's view of one order, as returned by `GET /orders`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOrderView {
    pub broker_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub filled_qty: i64,
    /// Decimal string; "0.000000" when unfilled.
    pub avg_fill_price: String,
    /// Broker status vocabulary; see [`map_broker_status`].
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Broker's view of one position, as returned by `GET /positions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPositionView {
    pub symbol: String,
    /// Signed.
    pub qty: i64,
    /// Decimal string.
    pub avg_entry_price: String,
}

/// Map the broker's order-status vocabulary onto engine states.
///
/// Returns `None` for a status this system does not recognize — callers must
/// treat that as no evidence, never as `SUBMITTED`.
pub fn map_broker_status(status: &str) -> Option<OrderState> {
    match status {
        "new" | "accepted" | "open" => Some(OrderState::Submitted),
        "partially_filled" => Some(OrderState::PartialFill),
        "filled" => Some(OrderState::Filled),
        "pending_cancel" => Some(OrderState::Cancelling),
        "canceled" | "cancelled" => Some(OrderState::Cancelled),
        "rejected" => Some(OrderState::Rejected),
        _ => None,
    }
}
