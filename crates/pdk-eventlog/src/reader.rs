//! Replay path: read day files back for ETL and recovery tooling.

use crate::record::EventRecord;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Read every record of one day file, in append order.
///
/// The file is expected to be clean (tail recovery runs at writer open);
/// a malformed line here is a hard error, not something to skip silently.
pub fn read_records(path: &Path) -> Result<Vec<EventRecord>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read event log {}", path.display()))?;

    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let rec: EventRecord = serde_json::from_str(line)
            .with_context(|| format!("parse record at {}:{}", path.display(), i + 1))?;
        out.push(rec);
    }
    Ok(out)
}

/// All day files under the root, sorted by date (filename order).
pub fn list_day_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read_dir {}", root.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("events-") && name.ends_with(".jsonl") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use crate::writer::{EventLogWriter, FsyncPolicy};

    #[test]
    fn lists_only_day_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("events-2026-03-03.jsonl"), "").unwrap();
        fs::write(dir.path().join("events-2026-03-01.jsonl"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = list_day_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["events-2026-03-01.jsonl", "events-2026-03-03.jsonl"]
        );
    }

    #[test]
    fn append_order_is_read_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
        for i in 0..5 {
            log.append(RecordKind::Metric, serde_json::json!({"i": i}))
                .unwrap();
        }
        log.flush().unwrap();

        let files = list_day_files(dir.path()).unwrap();
        let recs = read_records(&files[0]).unwrap();
        let seq: Vec<i64> = recs.iter().map(|r| r.data["i"].as_i64().unwrap()).collect();
        assert_eq!(seq, vec![0, 1, 2, 3, 4]);
    }
}
