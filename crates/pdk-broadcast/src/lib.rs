//! pdk-broadcast
//!
//! The sequenced fan-out hub behind the observer WebSocket. Observers are
//! read-only: nothing that arrives from a client can mutate trading
//! state. Transport lives in the daemon; this crate is pure channel
//! bookkeeping and therefore testable without a socket.
//!
//! Guarantees:
//! - per-connection `seq` is strictly monotonic and gap-free; the only
//!   responses to a client-detected gap are whole-state snapshots
//! - a subscribe is answered with a SNAPSHOT of the subscribed channels
//!   plus the next seq, so late joiners need no backfill
//! - a slow consumer whose buffer fills is disconnected rather than
//!   allowed to stall the publisher; it rejoins via subscribe → snapshot

mod hub;
mod protocol;

pub use hub::{BroadcastHub, ConnId};
pub use protocol::{
    market_channel, ClientMsg, Envelope, CHANNEL_EQUITY, CHANNEL_HANDSHAKE, CHANNEL_HEALTH,
    CHANNEL_ORDERS, CHANNEL_POSITIONS, CHANNEL_REGIME, CHANNEL_SNAPSHOT,
};
