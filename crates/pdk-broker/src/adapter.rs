//! The broker capability.
//!
//! Methods return `impl Future + Send` so engine tasks can run them from
//! spawned workers; backends implement them with plain `async fn`.

use crate::error::BrokerError;
use pdk_schemas::{BrokerOrderView, BrokerPositionView, OrderType, Side};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// `POST /orders` body. Idempotent at the broker on `client_order_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub qty: i64,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Decimal string; present iff limit order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    /// Broker-assigned order id.
    pub order_id: String,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub status: String,
}

/// Everything the lifecycle engine, the reconciler, and the supervisor
/// need from a broker. One implementation per backend; callers stay
/// generic (`B: BrokerAdapter`). There is no trait-object path to a
/// broker, mirroring the single-choke-point rule for order flow.
pub trait BrokerAdapter: Send + Sync {
    fn place(
        &self,
        req: &PlaceOrderRequest,
    ) -> impl Future<Output = Result<PlaceOrderResponse, BrokerError>> + Send;

    fn cancel(
        &self,
        broker_order_id: &str,
    ) -> impl Future<Output = Result<CancelResponse, BrokerError>> + Send;

    /// Lookup by idempotency key. `Ok(None)` means the broker definitively
    /// does not know the order — callers must never map that to SUBMITTED.
    fn get_order(
        &self,
        client_order_id: &str,
    ) -> impl Future<Output = Result<Option<BrokerOrderView>, BrokerError>> + Send;

    fn list_open_orders(
        &self,
    ) -> impl Future<Output = Result<Vec<BrokerOrderView>, BrokerError>> + Send;

    fn get_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<BrokerPositionView>, BrokerError>> + Send;

    /// Cancel every open order; returns how many were cancelled.
    fn cancel_all(&self) -> impl Future<Output = Result<u32, BrokerError>> + Send;
}
