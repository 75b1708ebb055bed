//! pdk-eventlog
//!
//! The append-only event log: the single source of truth for "what
//! happened". One UTF-8 JSON object per line, LF-terminated, rotated by
//! UTC date, never overwritten. Both processes append to the same root
//! (O_APPEND line writes; each process serializes its own writer behind a
//! mutex).
//!
//! Durability is batched: the file is fsynced when either the configured
//! interval elapses or the configured byte budget accumulates, whichever
//! comes first. On open, a corrupted trailing record (torn write at crash)
//! is truncated back to the last valid LF boundary.

mod reader;
mod record;
mod writer;

pub use reader::{list_day_files, read_records};
pub use record::{EventRecord, RecordKind};
pub use writer::{EventLogWriter, FsyncPolicy, RecoveryReport};
