//! Atomic per-key JSON files under the mirror root.
//!
//! Layout:
//!   <root>/positions/<symbol>.json
//!   <root>/orders/<order_id>.json
//!   <root>/heartbeats/<role>.json
//!   <root>/equity.json
//!   <root>/regime.json
//!   <root>/halt.json
//!
//! Writes go through a temp file + rename so a reader never observes a
//! half-written value.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Keys become file names; keep them path-safe.
pub(crate) fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec(value).context("serialize mirror value")?;
    fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => {
            let v = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse mirror file {}", path.display()))?;
            Ok(Some(v))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

/// Every `.json` file directly under `dir` (absent dir => empty).
pub(crate) fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e).with_context(|| format!("read_dir {}", dir.display())),
    };
    for entry in rd {
        let entry = entry?;
        let p = entry.path();
        if p.extension().map(|e| e == "json").unwrap_or(false) {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}
