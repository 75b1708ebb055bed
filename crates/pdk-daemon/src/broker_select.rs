//! Runtime broker selection without trait objects.
//!
//! The broker capability is deliberately not object-safe (no `dyn`
//! escape hatch around the single choke point), so mode selection is an
//! enum that forwards every call.

use pdk_broker::{
    BrokerAdapter, BrokerError, CancelResponse, HttpBroker, PaperBroker, PlaceOrderRequest,
    PlaceOrderResponse,
};
use pdk_schemas::{BrokerOrderView, BrokerPositionView};

pub enum AnyBroker {
    Paper(PaperBroker),
    Http(HttpBroker),
}

impl AnyBroker {
    /// Paper-mode handle for the in-process event feed; None in http mode.
    pub fn paper(&self) -> Option<&PaperBroker> {
        match self {
            AnyBroker::Paper(b) => Some(b),
            AnyBroker::Http(_) => None,
        }
    }
}

impl BrokerAdapter for AnyBroker {
    async fn place(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderResponse, BrokerError> {
        match self {
            AnyBroker::Paper(b) => b.place(req).await,
            AnyBroker::Http(b) => b.place(req).await,
        }
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<CancelResponse, BrokerError> {
        match self {
            AnyBroker::Paper(b) => b.cancel(broker_order_id).await,
            AnyBroker::Http(b) => b.cancel(broker_order_id).await,
        }
    }

    async fn get_order(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrderView>, BrokerError> {
        match self {
            AnyBroker::Paper(b) => b.get_order(client_order_id).await,
            AnyBroker::Http(b) => b.get_order(client_order_id).await,
        }
    }

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrderView>, BrokerError> {
        match self {
            AnyBroker::Paper(b) => b.list_open_orders().await,
            AnyBroker::Http(b) => b.list_open_orders().await,
        }
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPositionView>, BrokerError> {
        match self {
            AnyBroker::Paper(b) => b.get_positions().await,
            AnyBroker::Http(b) => b.get_positions().await,
        }
    }

    async fn cancel_all(&self) -> Result<u32, BrokerError> {
        match self {
            AnyBroker::Paper(b) => b.cancel_all().await,
            AnyBroker::Http(b) => b.cancel_all().await,
        }
    }
}
