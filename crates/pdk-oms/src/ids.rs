//! Identifier derivation.
//!
//! `client_order_id` is the idempotency key: it MUST be identical for the
//! same logical intent across retries AND across process restarts, so the
//! derivation is a pure hash of the intent coordinates — no clock, no RNG.
//! A crashed process that re-derives the id for an in-flight intent
//! resolves to the same broker order instead of duplicating it.
//!
//! `order_id` is the server-generated handle: time-ordered (millisecond
//! prefix + monotonic counter) with a short per-run tag so ids from
//! different runs never collide even within the same millisecond.

use chrono::Utc;
use pdk_schemas::Side;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Derive the idempotency key for one logical trading intent.
///
/// `decision_ts_bucket` is the decision loop's tick bucket (e.g. epoch
/// seconds / interval), which separates "the same signal re-armed next
/// tick" from a crash-retry of the identical decision.
pub fn derive_client_order_id(
    strategy_id: &str,
    signal_id: &str,
    symbol: &str,
    side: Side,
    qty: i64,
    decision_ts_bucket: i64,
) -> String {
    let preimage =
        format!("pdk.cid.v1|{strategy_id}|{signal_id}|{symbol}|{side}|{qty}|{decision_ts_bucket}");
    let mut hasher = Sha256::new();
    hasher.update(preimage.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("cid-{}", &digest[..20])
}

/// Time-ordered order-id generator, unique within and across runs.
pub struct OrderIdGen {
    run_tag: String,
    counter: AtomicU64,
}

impl OrderIdGen {
    pub fn new() -> Self {
        let tag: u16 = rand::thread_rng().gen();
        Self {
            run_tag: format!("{tag:04x}"),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = Utc::now().timestamp_millis();
        format!("ord-{millis:013}-{}-{n:06}", self.run_tag)
    }
}

impl Default for OrderIdGen {
    fn default() -> Self {
        Self::new()
    }
}
