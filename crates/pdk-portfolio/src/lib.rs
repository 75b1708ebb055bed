//! pdk-portfolio
//!
//! Fill-driven accounting:
//! - the position book is derived from fills (plus broker reconciliation
//!   overwrites, where the broker is authoritative)
//! - weighted-average cost basis, realized vs unrealized PnL
//! - equity = cash + marked position value
//! - pure deterministic logic: no IO, no clocks, no broker wiring

mod book;
mod fixedpoint;

pub use book::{AccountingError, MarkMap, PositionBook, PositionState};
pub use fixedpoint::Micros;
