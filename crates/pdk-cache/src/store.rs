//! The cache proper: stamped values, monotonic merge, mirror sync.

use crate::mirror::{list_json_files, read_json, sanitize_key, write_atomic};
use anyhow::{Context, Result};
use chrono::Utc;
use pdk_schemas::{EquityPoint, HaltFlag, Heartbeat, MarketRegime, Order, Position, ProcessRole};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// Writer-clock logical timestamp, epoch microseconds.
pub fn logical_ts_now() -> i64 {
    Utc::now().timestamp_micros()
}

// ---------------------------------------------------------------------------
// Stamped
// ---------------------------------------------------------------------------

/// A value plus its merge ordering key: writer timestamp, then version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub ts_micros: i64,
    pub version: u64,
    pub data: T,
}

impl<T> Stamped<T> {
    pub fn new(ts_micros: i64, version: u64, data: T) -> Self {
        Self {
            ts_micros,
            version,
            data,
        }
    }

    /// Stamp with the current logical clock and version 0.
    pub fn now(data: T) -> Self {
        Self::new(logical_ts_now(), 0, data)
    }

    /// Merge ordering: ts first, version as the tie-break.
    fn supersedes<U>(&self, stored: &Stamped<U>) -> bool {
        self.ts_micros > stored.ts_micros
            || (self.ts_micros == stored.ts_micros && self.version > stored.version)
    }
}

fn merge_into<T>(slot: &mut Option<Stamped<T>>, incoming: Stamped<T>) -> bool {
    match slot {
        Some(stored) if !incoming.supersedes(stored) => false,
        _ => {
            *slot = Some(incoming);
            true
        }
    }
}

fn merge_map<T>(map: &mut BTreeMap<String, Stamped<T>>, key: String, incoming: Stamped<T>) -> bool {
    match map.get(&key) {
        Some(stored) if !incoming.supersedes(stored) => false,
        _ => {
            map.insert(key, incoming);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// LiveStateCache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    positions: BTreeMap<String, Stamped<Position>>,
    orders: BTreeMap<String, Stamped<Order>>,
    heartbeats: BTreeMap<String, Stamped<Heartbeat>>,
    equity: Option<Stamped<EquityPoint>>,
    regime: Option<Stamped<MarketRegime>>,
    halt: Option<Stamped<HaltFlag>>,
}

/// Consistent point-in-time copy of everything in the cache.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub positions: BTreeMap<String, Position>,
    pub orders: BTreeMap<String, Order>,
    pub heartbeats: BTreeMap<String, Heartbeat>,
    pub equity: Option<EquityPoint>,
    pub regime: Option<MarketRegime>,
    pub halt: Option<HaltFlag>,
}

pub struct LiveStateCache {
    inner: RwLock<Inner>,
    mirror: Option<PathBuf>,
}

impl LiveStateCache {
    /// Memory-only cache (unit tests, embedded use).
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            mirror: None,
        }
    }

    /// Cache backed by a file mirror. Existing mirror state (notably a
    /// persisted halt flag) is loaded immediately.
    pub fn open(mirror_root: impl Into<PathBuf>) -> Result<Self> {
        let root = mirror_root.into();
        fs::create_dir_all(&root).with_context(|| format!("create_dir_all {}", root.display()))?;
        let cache = Self {
            inner: RwLock::new(Inner::default()),
            mirror: Some(root),
        };
        cache.refresh_from_mirror()?;
        Ok(cache)
    }

    // -- writes ------------------------------------------------------------

    pub fn put_position(&self, incoming: Stamped<Position>) -> bool {
        let key = incoming.data.symbol.clone();
        let accepted = {
            let mut g = self.write_lock();
            merge_map(&mut g.positions, key.clone(), incoming.clone())
        };
        if accepted {
            self.mirror_write(&format!("positions/{}.json", sanitize_key(&key)), &incoming);
        }
        accepted
    }

    pub fn put_order(&self, incoming: Stamped<Order>) -> bool {
        let key = incoming.data.order_id.clone();
        let accepted = {
            let mut g = self.write_lock();
            merge_map(&mut g.orders, key.clone(), incoming.clone())
        };
        if accepted {
            self.mirror_write(&format!("orders/{}.json", sanitize_key(&key)), &incoming);
        }
        accepted
    }

    pub fn put_heartbeat(&self, incoming: Stamped<Heartbeat>) -> bool {
        let key = incoming.data.role.as_str().to_string();
        let accepted = {
            let mut g = self.write_lock();
            merge_map(&mut g.heartbeats, key.clone(), incoming.clone())
        };
        if accepted {
            self.mirror_write(&format!("heartbeats/{key}.json"), &incoming);
        }
        accepted
    }

    pub fn put_equity(&self, incoming: Stamped<EquityPoint>) -> bool {
        let accepted = {
            let mut g = self.write_lock();
            merge_into(&mut g.equity, incoming.clone())
        };
        if accepted {
            self.mirror_write("equity.json", &incoming);
        }
        accepted
    }

    pub fn put_regime(&self, incoming: Stamped<MarketRegime>) -> bool {
        let accepted = {
            let mut g = self.write_lock();
            merge_into(&mut g.regime, incoming.clone())
        };
        if accepted {
            self.mirror_write("regime.json", &incoming);
        }
        accepted
    }

    /// Set or clear the halt flag. Also subject to monotonic merge so a
    /// replayed stale write cannot resurrect a cleared flag.
    pub fn put_halt(&self, incoming: Stamped<HaltFlag>) -> bool {
        let accepted = {
            let mut g = self.write_lock();
            merge_into(&mut g.halt, incoming.clone())
        };
        if accepted {
            self.mirror_write("halt.json", &incoming);
        }
        accepted
    }

    // -- reads -------------------------------------------------------------

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.read_lock().positions.get(symbol).map(|s| s.data.clone())
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.read_lock().orders.get(order_id).map(|s| s.data.clone())
    }

    pub fn heartbeat(&self, role: ProcessRole) -> Option<Heartbeat> {
        self.read_lock()
            .heartbeats
            .get(role.as_str())
            .map(|s| s.data.clone())
    }

    pub fn equity(&self) -> Option<EquityPoint> {
        self.read_lock().equity.as_ref().map(|s| s.data.clone())
    }

    pub fn regime(&self) -> Option<MarketRegime> {
        self.read_lock().regime.as_ref().map(|s| s.data)
    }

    pub fn halt(&self) -> Option<HaltFlag> {
        self.read_lock().halt.as_ref().map(|s| s.data.clone())
    }

    pub fn halt_active(&self) -> bool {
        self.halt().map(|h| h.active).unwrap_or(false)
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let g = self.read_lock();
        LiveSnapshot {
            positions: g
                .positions
                .iter()
                .map(|(k, v)| (k.clone(), v.data.clone()))
                .collect(),
            orders: g
                .orders
                .iter()
                .map(|(k, v)| (k.clone(), v.data.clone()))
                .collect(),
            heartbeats: g
                .heartbeats
                .iter()
                .map(|(k, v)| (k.clone(), v.data.clone()))
                .collect(),
            equity: g.equity.as_ref().map(|s| s.data.clone()),
            regime: g.regime.as_ref().map(|s| s.data),
            halt: g.halt.as_ref().map(|s| s.data.clone()),
        }
    }

    // -- mirror ------------------------------------------------------------

    /// Pull the mirror into memory under the same monotonic merge. The
    /// supervisor calls this every cycle; the trading process calls it once
    /// at boot to pick up a persisted halt flag.
    pub fn refresh_from_mirror(&self) -> Result<()> {
        let Some(root) = &self.mirror else {
            return Ok(());
        };

        for path in list_json_files(&root.join("positions"))? {
            if let Some(v) = read_json::<Stamped<Position>>(&path)? {
                let mut g = self.write_lock();
                let key = v.data.symbol.clone();
                merge_map(&mut g.positions, key, v);
            }
        }
        for path in list_json_files(&root.join("orders"))? {
            if let Some(v) = read_json::<Stamped<Order>>(&path)? {
                let mut g = self.write_lock();
                let key = v.data.order_id.clone();
                merge_map(&mut g.orders, key, v);
            }
        }
        for path in list_json_files(&root.join("heartbeats"))? {
            if let Some(v) = read_json::<Stamped<Heartbeat>>(&path)? {
                let mut g = self.write_lock();
                let key = v.data.role.as_str().to_string();
                merge_map(&mut g.heartbeats, key, v);
            }
        }
        if let Some(v) = read_json::<Stamped<EquityPoint>>(&root.join("equity.json"))? {
            merge_into(&mut self.write_lock().equity, v);
        }
        if let Some(v) = read_json::<Stamped<MarketRegime>>(&root.join("regime.json"))? {
            merge_into(&mut self.write_lock().regime, v);
        }
        if let Some(v) = read_json::<Stamped<HaltFlag>>(&root.join("halt.json"))? {
            merge_into(&mut self.write_lock().halt, v);
        }
        Ok(())
    }

    fn mirror_write<T: Serialize + DeserializeOwned>(&self, rel: &str, value: &Stamped<T>) {
        let Some(root) = &self.mirror else { return };
        let path = root.join(rel);
        if let Err(e) = write_atomic(&path, value) {
            // The cache stays authoritative in-memory; a mirror write failure
            // must not take down the trading path.
            tracing::warn!("mirror write {rel} failed: {e:#}");
        }
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("cache lock poisoned")
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("cache lock poisoned")
    }
}
