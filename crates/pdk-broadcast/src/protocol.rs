//! Wire shapes for the observer channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHANNEL_POSITIONS: &str = "positions";
pub const CHANNEL_ORDERS: &str = "orders";
pub const CHANNEL_EQUITY: &str = "equity";
pub const CHANNEL_REGIME: &str = "regime";
pub const CHANNEL_HEALTH: &str = "health";
/// Control frames ride the same envelope under these names.
pub const CHANNEL_HANDSHAKE: &str = "handshake";
pub const CHANNEL_SNAPSHOT: &str = "snapshot";

/// Per-symbol market channel name: `market:AAPL`.
pub fn market_channel(symbol: &str) -> String {
    format!("market:{symbol}")
}

/// Every server frame: `{seq, ts, channel, payload}` with `seq` strictly
/// increasing per connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub channel: String,
    pub payload: Value,
}

/// The only two things a client may say.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMsg {
    Subscribe { channels: Vec<String> },
    Resync { last_seen_seq: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_wire_shape() {
        let m: ClientMsg =
            serde_json::from_str(r#"{"action":"subscribe","channels":["orders","equity"]}"#)
                .unwrap();
        assert_eq!(
            m,
            ClientMsg::Subscribe {
                channels: vec!["orders".to_string(), "equity".to_string()]
            }
        );

        let m: ClientMsg =
            serde_json::from_str(r#"{"action":"resync","last_seen_seq":43}"#).unwrap();
        assert_eq!(m, ClientMsg::Resync { last_seen_seq: 43 });
    }

    #[test]
    fn market_channel_format() {
        assert_eq!(market_channel("AAPL"), "market:AAPL");
    }
}
