//! The hub proper.

use crate::protocol::{ClientMsg, Envelope, CHANNEL_HANDSHAKE, CHANNEL_SNAPSHOT};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub type ConnId = u64;

struct Conn {
    tx: mpsc::Sender<Envelope>,
    subs: BTreeSet<String>,
    /// Last seq handed to this connection; next frame gets seq + 1.
    seq: u64,
}

struct HubInner {
    /// Current value per channel: the whole-state snapshot source.
    latest: BTreeMap<String, Value>,
    conns: HashMap<ConnId, Conn>,
    next_conn_id: ConnId,
}

/// One hub per trading process; all observer connections hang off it.
pub struct BroadcastHub {
    server_identity: String,
    inner: Mutex<HubInner>,
}

impl BroadcastHub {
    pub fn new(server_identity: impl Into<String>) -> Self {
        Self {
            server_identity: server_identity.into(),
            inner: Mutex::new(HubInner {
                latest: BTreeMap::new(),
                conns: HashMap::new(),
                next_conn_id: 1,
            }),
        }
    }

    /// Attach a connection. The HANDSHAKE frame (seq 0) is queued before
    /// this returns, so the first thing every observer sees is the server
    /// identity and the starting seq.
    pub fn connect(&self, buffer: usize) -> (ConnId, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut g = self.lock();
        let id = g.next_conn_id;
        g.next_conn_id += 1;

        let handshake = Envelope {
            seq: 0,
            ts: Utc::now(),
            channel: CHANNEL_HANDSHAKE.to_string(),
            payload: serde_json::json!({
                "server": self.server_identity,
                "next_seq": 1,
            }),
        };
        // Buffer is fresh; the only way this fails is a dropped receiver.
        let _ = tx.try_send(handshake);

        g.conns.insert(
            id,
            Conn {
                tx,
                subs: BTreeSet::new(),
                seq: 0,
            },
        );
        (id, rx)
    }

    pub fn disconnect(&self, id: ConnId) {
        self.lock().conns.remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.lock().conns.len()
    }

    /// Handle one client frame.
    pub fn handle_client_msg(&self, id: ConnId, msg: ClientMsg) {
        match msg {
            ClientMsg::Subscribe { channels } => self.subscribe(id, channels),
            ClientMsg::Resync { last_seen_seq } => self.resync(id, last_seen_seq),
        }
    }

    /// Replace the connection's subscriptions and answer with a SNAPSHOT.
    pub fn subscribe(&self, id: ConnId, channels: Vec<String>) {
        let mut g = self.lock();
        let payload = snapshot_payload(&g.latest, &channels);
        let Some(conn) = g.conns.get_mut(&id) else {
            return;
        };
        conn.subs = channels.into_iter().collect();
        send_control(conn, CHANNEL_SNAPSHOT, payload);
    }

    /// A client saw a gap: answer with a fresh whole-state SNAPSHOT. No
    /// replay — snapshots carry the entire current value of every
    /// subscribed channel, so nothing can be double-applied.
    pub fn resync(&self, id: ConnId, last_seen_seq: u64) {
        let mut g = self.lock();
        let Some(conn) = g.conns.get(&id) else { return };
        let channels: Vec<String> = conn.subs.iter().cloned().collect();
        tracing::debug!(conn = id, last_seen_seq, "resync requested");
        let payload = snapshot_payload(&g.latest, &channels);
        if let Some(conn) = g.conns.get_mut(&id) {
            send_control(conn, CHANNEL_SNAPSHOT, payload);
        }
    }

    /// Publish a new value on a channel: store it for snapshots, fan out
    /// to every subscribed connection. A connection that cannot absorb the
    /// frame (full buffer, gone receiver) is dropped — it re-enters via
    /// subscribe and gets a snapshot, losing nothing.
    pub fn publish(&self, channel: &str, payload: Value) {
        let mut g = self.lock();
        g.latest.insert(channel.to_string(), payload.clone());

        let mut dead = Vec::new();
        for (id, conn) in g.conns.iter_mut() {
            if !conn.subs.contains(channel) {
                continue;
            }
            conn.seq += 1;
            let env = Envelope {
                seq: conn.seq,
                ts: Utc::now(),
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if conn.tx.try_send(env).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            tracing::warn!(conn = id, "observer too slow; disconnecting");
            g.conns.remove(&id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().expect("broadcast hub mutex poisoned")
    }
}

fn snapshot_payload(latest: &BTreeMap<String, Value>, channels: &[String]) -> Value {
    let mut map = serde_json::Map::new();
    for ch in channels {
        if let Some(v) = latest.get(ch) {
            map.insert(ch.clone(), v.clone());
        }
    }
    serde_json::json!({ "channels": map })
}

fn send_control(conn: &mut Conn, channel: &str, mut payload: Value) {
    conn.seq += 1;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("next_seq".to_string(), serde_json::json!(conn.seq + 1));
    }
    let env = Envelope {
        seq: conn.seq,
        ts: Utc::now(),
        channel: channel.to_string(),
        payload,
    };
    let _ = conn.tx.try_send(env);
}
