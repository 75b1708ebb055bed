//! pdk-daemon
//!
//! The trading process. Wires ingestion contracts, the decision loop,
//! the lifecycle engine, the reconciler, the ETL worker, and the
//! broadcast bus into one tokio runtime, and exposes the control
//! surface:
//!
//!   GET  /v1/health            liveness + build info
//!   GET  /v1/status            process status snapshot
//!   GET  /v1/stream            WebSocket; the broadcast bus
//!   POST /system/emergency-halt  idempotent halt-flag set
//!
//! `run_trading` blocks until shutdown and reports how it ended; the CLI
//! maps that onto exit codes.

mod app;
mod broker_select;
mod routes;
mod state;

pub use app::{run_trading, RunOutcome};
pub use broker_select::AnyBroker;
pub use routes::build_router;
pub use state::{AppState, BuildInfo, StatusSnapshot};
