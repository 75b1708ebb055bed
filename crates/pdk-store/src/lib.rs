//! pdk-store
//!
//! The analytical store: append-only Postgres tables derived from the
//! event log by the ETL worker. Money columns are bigint micros, same as
//! everywhere else in the workspace.
//!
//! Idempotency: every row insert conflicts on its natural key and does
//! nothing on conflict, so replaying any event-log range is a no-op.
//!
//! Backtest gate: `load_bars` REJECTS (errors on) a range containing any
//! `universe`-tier row rather than silently filtering it. Screening-tier
//! data reaching a backtest is a correctness bug, not a preference.

mod etl;
mod loader;
mod schema;

pub use etl::{rows_from_record, EtlRow, EtlStats, EtlWorker};
pub use loader::{load_bars, BarRow, UniverseTierRejected};
pub use schema::ensure_schema;
