//! pdk-supervisor
//!
//! The independent watchdog. Runs in its OWN process with its OWN broker
//! credentials; shares nothing with the trading process except the
//! live-state mirror and the event log. Its authority is unconditional:
//! it can cancel every order, flatten the book, and terminate the trading
//! process whether or not that process cooperates.
//!
//! - [`rules`]: pure kill-rule evaluator (deterministic, no IO)
//! - [`actuator`]: the shutdown path — durable halt flag, cancel-all,
//!   flattening orders under supervisor-issued idempotency keys, and
//!   cooperative-then-forced termination
//! - [`Supervisor`]: the cycle loop that feeds one into the other

mod actuator;
mod rules;
mod supervisor;

pub use actuator::{supervisor_flatten_cid, ActuatorConfig, ShutdownActuator, ShutdownReport};
pub use rules::{
    evaluate, KillAction, KillConfig, KillInput, OpenOrderInfo, SupervisorState,
};
pub use supervisor::Supervisor;
