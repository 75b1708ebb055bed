//! Engine error taxonomy: the failure surface callers of the order
//! lifecycle engine see.

use crate::state_machine::InvalidTransition;
use pdk_broker::BrokerError;
use pdk_schemas::OrderState;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum OmsError {
    /// Intent validation failure; nothing was created anywhere.
    BadRequest(String),
    /// Cancel requested from a state with no legal path to CANCELLING.
    NotCancellable { order_id: String, state: OrderState },
    /// No order with that id.
    UnknownOrder(String),
    /// Illegal state transition; the order is unchanged.
    InvariantViolation(InvalidTransition),
    /// The halt flag is active; no new intents are accepted.
    HaltActive,
    /// Local substrate failure (event log, cache).
    Internal(String),
    Broker(BrokerError),
}

impl fmt::Display for OmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmsError::BadRequest(s) => write!(f, "bad request: {s}"),
            OmsError::NotCancellable { order_id, state } => {
                write!(f, "order {order_id} not cancellable from {state}")
            }
            OmsError::UnknownOrder(id) => write!(f, "unknown order {id}"),
            OmsError::InvariantViolation(t) => write!(f, "{t}"),
            OmsError::HaltActive => write!(f, "halt flag active; intent refused"),
            OmsError::Internal(s) => write!(f, "internal: {s}"),
            OmsError::Broker(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OmsError {}

impl From<InvalidTransition> for OmsError {
    fn from(t: InvalidTransition) -> Self {
        OmsError::InvariantViolation(t)
    }
}

impl From<BrokerError> for OmsError {
    fn from(e: BrokerError) -> Self {
        OmsError::Broker(e)
    }
}
