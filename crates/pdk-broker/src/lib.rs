//! pdk-broker
//!
//! The broker boundary. Three pieces:
//!
//! - [`BrokerAdapter`]: the capability every broker backend implements.
//!   All operations return a classified result (`Ok` / `Retriable` /
//!   `Fatal` / `BadRequest`) so callers never inspect transport details.
//! - [`HttpBroker`]: the upstream broker over REST (+ the event stream
//!   consumer in [`stream`]).
//! - [`PaperBroker`]: deterministic in-memory backend. Nothing happens
//!   unless a test or the paper loop injects it: submits are accepted and
//!   idempotent by `client_order_id`, fills/rejects/cancel-confirms are
//!   explicit injections. It doubles as the broker fixture for every
//!   scenario test in the workspace.

mod adapter;
mod error;
mod http;
mod paper;
pub mod stream;

pub use adapter::{BrokerAdapter, CancelResponse, PlaceOrderRequest, PlaceOrderResponse};
pub use error::BrokerError;
pub use http::HttpBroker;
pub use paper::PaperBroker;
pub use stream::{run_event_stream, StreamConfig, StreamSignal};
