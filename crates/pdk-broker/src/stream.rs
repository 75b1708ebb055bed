//! Broker event-stream consumer.
//!
//! One reader per process. Frames are JSON [`BrokerEvent`]s with a
//! per-session monotonic `seq`; on reconnect the consumer resubscribes
//! from the last seen seq and emits [`StreamSignal::Resynced`] FIRST so
//! the owner runs a full reconcile before trusting the stream again.

use futures_util::{SinkExt, StreamExt};
use pdk_schemas::BrokerEvent;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub url: String,
    pub key_id: String,
    pub secret: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

/// What the consumer hands to its single reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    /// The connection (re)established after a gap; run `reconcile_all`
    /// before processing further events.
    Resynced,
    Event(BrokerEvent),
}

/// Run until `shutdown` flips true or the receiver side goes away.
pub async fn run_event_stream(
    cfg: StreamConfig,
    tx: mpsc::Sender<StreamSignal>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_seq: Option<u64> = None;
    let mut first_connect = true;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let url = match last_seq {
            Some(seq) => format!("{}?after_seq={}", cfg.url, seq),
            None => cfg.url.clone(),
        };

        let conn = tokio::select! {
            c = connect_async(&url) => c,
            _ = shutdown.changed() => return,
        };

        let (mut ws, _) = match conn {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!("broker stream connect failed: {e}; retrying");
                tokio::select! {
                    _ = tokio::time::sleep(cfg.reconnect_delay) => continue,
                    _ = shutdown.changed() => return,
                }
            }
        };

        // Authenticate, then announce the (re)connection.
        let auth = serde_json::json!({
            "action": "auth",
            "key_id": cfg.key_id,
            "secret": cfg.secret,
        });
        if let Err(e) = ws.send(Message::Text(auth.to_string())).await {
            tracing::warn!("broker stream auth send failed: {e}; reconnecting");
            continue;
        }

        if !first_connect {
            if tx.send(StreamSignal::Resynced).await.is_err() {
                return;
            }
        }
        first_connect = false;
        tracing::info!(after_seq = ?last_seq, "broker stream connected");

        loop {
            let msg = tokio::select! {
                m = ws.next() => m,
                _ = shutdown.changed() => return,
            };

            match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<BrokerEvent>(&text) {
                    Ok(ev) => {
                        last_seq = Some(ev.seq);
                        if tx.send(StreamSignal::Event(ev)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("unparseable stream frame: {e}");
                    }
                },
                Some(Ok(Message::Ping(_)))
                | Some(Ok(Message::Pong(_)))
                | Some(Ok(Message::Binary(_)))
                | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    tracing::warn!("broker stream dropped; reconnecting");
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.reconnect_delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}
