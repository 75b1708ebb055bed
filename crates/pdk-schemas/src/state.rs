//! Live-state entities shared between the trading process, the supervisor,
//! and the broadcast bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Net position in one symbol, derived from fills plus broker reconciliation.
/// The broker is authoritative whenever the two diverge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed: +long, -short, 0 flat.
    pub net_qty: i64,
    pub avg_cost_micros: i64,
    pub realized_pnl_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            net_qty: 0,
            avg_cost_micros: 0,
            realized_pnl_micros: 0,
            unrealized_pnl_micros: 0,
            updated_at: at,
            version: 0,
        }
    }
}

/// Account equity at one instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub equity_micros: i64,
    pub cash_micros: i64,
    pub positions_value_micros: i64,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    Trading,
    Supervisor,
}

impl ProcessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessRole::Trading => "trading",
            ProcessRole::Supervisor => "supervisor",
        }
    }
}

/// Overwritten in the live-state cache on every beat. Staleness is the
/// supervisor's deadman signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// OS pid, used by the supervisor for forced termination.
    pub process_id: u32,
    pub role: ProcessRole,
    pub ts: DateTime<Utc>,
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// HaltFlag
// ---------------------------------------------------------------------------

/// Persistent stop signal. Set by the supervisor or an operator; cleared
/// ONLY by explicit operator action. Survives restarts of both processes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltFlag {
    pub active: bool,
    pub reason: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

impl HaltFlag {
    pub fn set(reason: impl Into<String>, set_by: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            active: true,
            reason: reason.into(),
            set_by: set_by.into(),
            set_at: at,
        }
    }
}
