//! Layered YAML loading with deterministic hashing.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&Path]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {}", p.display()))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {}", p.display()))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: merged,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Compact JSON with recursively sorted object keys.
fn canonicalize_json(v: &Value) -> String {
    serde_json::to_string(&sort_keys(v)).expect("canonical json serialization cannot fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        p
    }

    #[test]
    fn later_layer_overrides_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "oms:\n  ack_timeout_secs: 3\n");
        let over = write_yaml(&dir, "over.yaml", "oms:\n  ack_timeout_secs: 9\n");

        let loaded = load_layered_yaml(&[base.as_path(), over.as_path()]).unwrap();
        assert_eq!(loaded.config_json["oms"]["ack_timeout_secs"], 9);
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "a:\n  x: 1\n  y: 2\n");
        let over = write_yaml(&dir, "over.yaml", "a:\n  y: 3\n");

        let loaded = load_layered_yaml(&[base.as_path(), over.as_path()]).unwrap();
        assert_eq!(loaded.config_json["a"]["x"], 1);
        assert_eq!(loaded.config_json["a"]["y"], 3);
    }

    #[test]
    fn hash_is_stable_under_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "b: 2\na: 1\n");
        let b = write_yaml(&dir, "b.yaml", "a: 1\nb: 2\n");

        let la = load_layered_yaml(&[a.as_path()]).unwrap();
        let lb = load_layered_yaml(&[b.as_path()]).unwrap();
        assert_eq!(la.config_hash, lb.config_hash);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(load_layered_yaml(&[missing.as_path()]).is_err());
    }
}
