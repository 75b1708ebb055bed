//! Classified broker errors.
//!
//! | Classification | Meaning | Caller policy |
//! |---|---|---|
//! | `BadRequest` | local validation failure | never sent, never retried |
//! | `Retriable`  | transport error, timeout, 429, 5xx | retry with backoff under the SAME idempotency key |
//! | `Fatal`      | semantic 4xx from the broker | no retry; order -> REJECTED/FAILED |

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerError {
    BadRequest(String),
    Retriable(String),
    Fatal(String),
}

impl BrokerError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, BrokerError::Retriable(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            BrokerError::BadRequest(s) | BrokerError::Retriable(s) | BrokerError::Fatal(s) => s,
        }
    }

    /// Classify an HTTP status: 429 and 5xx are retriable, every other
    /// non-2xx is a semantic rejection.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || (500..600).contains(&status) {
            BrokerError::Retriable(format!("http {status}: {body}"))
        } else {
            BrokerError::Fatal(format!("http {status}: {body}"))
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::BadRequest(s) => write!(f, "bad request: {s}"),
            BrokerError::Retriable(s) => write!(f, "retriable broker error: {s}"),
            BrokerError::Fatal(s) => write!(f, "fatal broker error: {s}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_5xx_are_retriable() {
        assert!(BrokerError::from_status(429, String::new()).is_retriable());
        assert!(BrokerError::from_status(500, String::new()).is_retriable());
        assert!(BrokerError::from_status(503, String::new()).is_retriable());
    }

    #[test]
    fn semantic_4xx_is_fatal() {
        assert!(!BrokerError::from_status(400, String::new()).is_retriable());
        assert!(!BrokerError::from_status(403, String::new()).is_retriable());
        assert!(!BrokerError::from_status(422, String::new()).is_retriable());
    }
}
