//! pdk-cache
//!
//! The live-state cache (LSC): positions, open orders, equity, regime,
//! heartbeats, and the halt flag. In-memory, with an optional file mirror
//! that is the ONLY state shared between the trading process and the
//! supervisor — the supervisor refreshes its own cache instance from the
//! same mirror root and keeps its kill authority even when the trading
//! process is dead.
//!
//! Every write carries the writer's logical timestamp. Merges apply
//! monotonic-timestamp ordering: a write with `ts` older than the stored
//! value is dropped, and equal timestamps fall back to a `version`
//! tie-break. A stale REST response can therefore never overwrite a
//! fresher streamed event, and a stale mirror file can never overwrite a
//! fresher in-memory value.

mod mirror;
mod store;

pub use store::{logical_ts_now, LiveSnapshot, LiveStateCache, Stamped};
