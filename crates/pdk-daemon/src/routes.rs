//! Axum router and handlers for the control surface.
//!
//! `build_router` is the single entry point; `run_trading` attaches
//! middleware after this call so scenario tests can use the bare router.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use pdk_broadcast::ClientMsg;
use pdk_cache::Stamped;
use pdk_schemas::HaltFlag;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/stream", get(stream))
        .route("/system/emergency-halt", post(emergency_halt))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.status()))
}

// ---------------------------------------------------------------------------
// POST /system/emergency-halt
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct HaltResponse {
    active: bool,
    already_active: bool,
}

/// Idempotent: a second call acknowledges the existing flag.
pub(crate) async fn emergency_halt(State(st): State<Arc<AppState>>) -> Response {
    let already_active = st.cache.halt_active();
    if !already_active {
        st.cache.put_halt(Stamped::now(HaltFlag::set(
            "emergency halt endpoint",
            "operator",
            Utc::now(),
        )));
        tracing::warn!("emergency halt asserted via control surface");
    }
    (
        StatusCode::OK,
        Json(HaltResponse {
            active: true,
            already_active,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (WebSocket — the broadcast bus)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| observer_socket(st, socket))
}

/// One observer connection: hub frames out, subscribe/resync frames in.
/// Observers are read-only; nothing they send can mutate trading state.
async fn observer_socket(st: Arc<AppState>, mut socket: WebSocket) {
    let (conn_id, mut rx) = st.hub.connect(256);

    loop {
        tokio::select! {
            out = rx.recv() => {
                let Some(envelope) = out else { break };
                let text = match serde_json::to_string(&envelope) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => st.hub.handle_client_msg(conn_id, msg),
                            Err(e) => tracing::debug!(conn = conn_id, "ignoring frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    st.hub.disconnect(conn_id);
}
