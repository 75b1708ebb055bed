//! Append path: date-rotated files, batched fsync, crash-tail recovery.

use crate::record::{EventRecord, RecordKind};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// FsyncPolicy
// ---------------------------------------------------------------------------

/// Batched-durability policy: sync when either threshold is reached.
#[derive(Copy, Clone, Debug)]
pub struct FsyncPolicy {
    pub interval: Duration,
    pub bytes: u64,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            bytes: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// What tail recovery did to an existing day file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryReport {
    pub valid_records: usize,
    pub truncated_bytes: u64,
}

/// Truncate a day file back to its last valid LF boundary.
///
/// Scans complete (LF-terminated) lines from the start; the first line that
/// fails to parse as an [`EventRecord`], and everything after it, is cut.
/// Trailing bytes with no LF (a torn write) are always cut.
pub fn recover_tail(path: &Path) -> Result<RecoveryReport> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;

    let mut valid_end = 0usize;
    let mut valid_records = 0usize;
    let mut start = 0usize;

    for (i, b) in bytes.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        let line = &bytes[start..i];
        if serde_json::from_slice::<EventRecord>(line).is_ok() {
            valid_end = i + 1;
            valid_records += 1;
            start = i + 1;
        } else {
            break;
        }
    }

    let truncated = (bytes.len() - valid_end) as u64;
    if truncated > 0 {
        let f = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("open for truncate {}", path.display()))?;
        f.set_len(valid_end as u64)
            .with_context(|| format!("truncate {}", path.display()))?;
        f.sync_data().context("sync after truncate")?;
    }

    Ok(RecoveryReport {
        valid_records,
        truncated_bytes: truncated,
    })
}

/// Day-file naming: `events-YYYY-MM-DD.jsonl` under the log root.
pub fn day_path(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(format!("events-{}.jsonl", date.format("%Y-%m-%d")))
}

// ---------------------------------------------------------------------------
// EventLogWriter
// ---------------------------------------------------------------------------

struct OpenDay {
    date: NaiveDate,
    file: File,
}

struct Inner {
    root: PathBuf,
    policy: FsyncPolicy,
    current: Option<OpenDay>,
    bytes_since_sync: u64,
    last_sync: Instant,
}

/// Cloneable append handle. All appends from one process funnel through the
/// internal mutex, which is the per-file append lock.
#[derive(Clone)]
pub struct EventLogWriter {
    inner: Arc<Mutex<Inner>>,
}

impl EventLogWriter {
    /// Open (creating the root if needed) and recover today's tail.
    pub fn open(root: impl Into<PathBuf>, policy: FsyncPolicy) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("create_dir_all {}", root.display()))?;

        let today = Utc::now().date_naive();
        let today_path = day_path(&root, today);
        if today_path.exists() {
            recover_tail(&today_path)?;
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                root,
                policy,
                current: None,
                bytes_since_sync: 0,
                last_sync: Instant::now(),
            })),
        })
    }

    /// Append one record stamped with the current UTC time.
    pub fn append(&self, kind: RecordKind, data: Value) -> Result<EventRecord> {
        let rec = EventRecord::new(Utc::now(), kind, data);
        self.append_record(&rec)?;
        Ok(rec)
    }

    /// Append a pre-built record (tests and replay tooling).
    pub fn append_record(&self, rec: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(rec).context("serialize event record")?;
        let mut g = self.inner.lock().expect("event log mutex poisoned");
        g.write_line(rec.ts.date_naive(), line.as_bytes())
    }

    /// Force an fsync of the current day file.
    pub fn flush(&self) -> Result<()> {
        let mut g = self.inner.lock().expect("event log mutex poisoned");
        g.sync_now()
    }

    /// Root directory this writer appends under.
    pub fn root(&self) -> PathBuf {
        self.inner.lock().expect("event log mutex poisoned").root.clone()
    }
}

impl Inner {
    fn write_line(&mut self, date: NaiveDate, line: &[u8]) -> Result<()> {
        self.ensure_day(date)?;
        let day = self.current.as_mut().expect("ensure_day populated current");

        day.file.write_all(line).context("append event line")?;
        day.file.write_all(b"\n").context("append newline")?;
        self.bytes_since_sync += line.len() as u64 + 1;

        if self.bytes_since_sync >= self.policy.bytes
            || self.last_sync.elapsed() >= self.policy.interval
        {
            self.sync_now()?;
        }
        Ok(())
    }

    fn ensure_day(&mut self, date: NaiveDate) -> Result<()> {
        let needs_roll = match &self.current {
            Some(d) => d.date != date,
            None => true,
        };
        if !needs_roll {
            return Ok(());
        }

        // Rolling over: make the outgoing file durable first.
        if self.current.is_some() {
            self.sync_now()?;
        }

        let path = day_path(&self.root, date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open event log {}", path.display()))?;

        self.current = Some(OpenDay { date, file });
        Ok(())
    }

    fn sync_now(&mut self) -> Result<()> {
        if let Some(day) = &self.current {
            day.file.sync_data().context("fsync event log")?;
        }
        self.bytes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_records;
    use chrono::TimeZone;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();

        log.append(RecordKind::Heartbeat, serde_json::json!({"seq": 1}))
            .unwrap();
        log.append(RecordKind::Metric, serde_json::json!({"equity": "100000.000000"}))
            .unwrap();
        log.flush().unwrap();

        let path = day_path(dir.path(), Utc::now().date_naive());
        let recs = read_records(&path).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].kind, RecordKind::Heartbeat);
        assert_eq!(recs[1].kind, RecordKind::Metric);
    }

    #[test]
    fn torn_tail_is_truncated_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let good = serde_json::to_string(&EventRecord::new(
            ts,
            RecordKind::Halt,
            serde_json::json!({"reason": "test"}),
        ))
        .unwrap();

        let path = dir.path().join("events-2026-03-02.jsonl");
        fs::write(&path, format!("{good}\n{{\"ts\":\"2026-03-02T12:")).unwrap();

        let report = recover_tail(&path).unwrap();
        assert_eq!(report.valid_records, 1);
        assert!(report.truncated_bytes > 0);

        let recs = read_records(&path).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, RecordKind::Halt);
    }

    #[test]
    fn corrupt_middle_line_cuts_rest() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let good = serde_json::to_string(&EventRecord::new(
            ts,
            RecordKind::Bar,
            serde_json::json!({}),
        ))
        .unwrap();

        let path = dir.path().join("events-2026-03-02.jsonl");
        fs::write(&path, format!("{good}\nnot json\n{good}\n")).unwrap();

        let report = recover_tail(&path).unwrap();
        assert_eq!(report.valid_records, 1);
        assert_eq!(read_records(&path).unwrap().len(), 1);
    }

    #[test]
    fn clean_file_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
        log.append(RecordKind::Signal, serde_json::json!({})).unwrap();
        log.flush().unwrap();

        let path = day_path(dir.path(), Utc::now().date_naive());
        let before = fs::read(&path).unwrap();
        let report = recover_tail(&path).unwrap();
        assert_eq!(report.truncated_bytes, 0);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn byte_budget_forces_sync() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogWriter::open(
            dir.path(),
            FsyncPolicy {
                interval: Duration::from_secs(3600),
                bytes: 1, // every append syncs
            },
        )
        .unwrap();

        for i in 0..10 {
            log.append(RecordKind::Metric, serde_json::json!({"i": i}))
                .unwrap();
        }
        let path = day_path(dir.path(), Utc::now().date_naive());
        assert_eq!(read_records(&path).unwrap().len(), 10);
    }
}
