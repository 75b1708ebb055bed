//! pdk-oms
//!
//! The Order Lifecycle Engine: translates risk-approved intents into
//! broker orders and tracks each one to a terminal state.
//!
//! Structure:
//! - [`state_machine`]: pure per-order state machine. Enforces the legal
//!   transition graph, accumulates partial fills, and deduplicates
//!   replayed events by event id.
//! - [`ids`]: deterministic `client_order_id` derivation (idempotency key)
//!   and the time-ordered server `order_id` generator.
//! - [`backoff`]: exponential retry backoff with jitter for placement.
//! - [`engine`]: the async engine — per-order locks, event-log-first
//!   writes, broker placement with retry, timeout/zombie scans, and the
//!   consistent snapshot the broadcast bus fans out.

mod backoff;
mod engine;
mod errors;
mod ids;
mod state_machine;

pub use backoff::{backoff_delay, RetryPolicy};
pub use engine::{EngineSnapshot, OmsConfig, OrderEngine, OrderHandle};
pub use errors::OmsError;
pub use ids::{derive_client_order_id, OrderIdGen};
pub use state_machine::{OrderEvent, OrderRecord, Resolution, Transition};
