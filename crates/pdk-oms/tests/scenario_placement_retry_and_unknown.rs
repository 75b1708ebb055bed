//! Placement failure paths: transient errors retry under the same
//! idempotency key; exhaustion with no definitive answer parks the order
//! in UNKNOWN for the reconciler.

use pdk_broker::{BrokerAdapter, BrokerError, PaperBroker};
use pdk_cache::{LiveStateCache, Stamped};
use pdk_eventlog::{EventLogWriter, FsyncPolicy};
use pdk_oms::{OmsConfig, OmsError, OrderEngine, RetryPolicy};
use pdk_schemas::{HaltFlag, OrderIntent, OrderState, OrderType, Side};
use std::sync::Arc;
use std::time::Duration;

fn fast_retry() -> OmsConfig {
    OmsConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 1.0,
            jitter: 0.0,
        },
        ..OmsConfig::default()
    }
}

fn intent(cid: &str) -> OrderIntent {
    OrderIntent {
        client_order_id: cid.to_string(),
        strategy_id: "momo".to_string(),
        signal_id: "sig-2".to_string(),
        symbol: "AAPL".to_string(),
        side: Side::Buy,
        qty: 5,
        order_type: OrderType::Market,
        limit_price_micros: None,
    }
}

#[tokio::test]
async fn transient_failure_retries_same_key_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log, cache, fast_retry());

    broker.fail_next_place(BrokerError::Retriable("503".to_string()));
    let handle = engine.submit(intent("R")).await.unwrap();

    assert_eq!(handle.state, OrderState::Submitted);
    assert_eq!(broker.order_count(), 1, "one broker order despite the retry");
}

#[tokio::test]
async fn swallowed_placement_parks_in_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log, cache, fast_retry());

    // The broker accepts but the responses never arrive.
    broker.swallow_next_place();
    broker.fail_next_place(BrokerError::Retriable("timeout".to_string()));
    broker.fail_next_place(BrokerError::Retriable("timeout".to_string()));

    let handle = engine.submit(intent("C")).await.unwrap();
    assert_eq!(handle.state, OrderState::Unknown);

    // The broker really does hold the order — exactly why FAILED would be
    // the wrong verdict here.
    assert!(broker.get_order("C").await.unwrap().is_some());
    assert_eq!(engine.unknown_orders().await, vec!["C".to_string()]);
}

#[tokio::test]
async fn fatal_placement_rejects_the_order() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log, cache, fast_retry());

    broker.fail_next_place(BrokerError::Fatal("422 insufficient buying power".to_string()));
    let handle = engine.submit(intent("F")).await.unwrap();
    assert_eq!(handle.state, OrderState::Rejected);
}

#[tokio::test]
async fn active_halt_refuses_new_intents() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    cache.put_halt(Stamped::now(HaltFlag::set(
        "daily loss limit",
        "supervisor",
        chrono::Utc::now(),
    )));
    let engine = OrderEngine::new(broker.clone(), log, cache, fast_retry());

    let err = engine.submit(intent("H")).await.unwrap_err();
    assert!(matches!(err, OmsError::HaltActive));
    assert_eq!(broker.order_count(), 0);
}
