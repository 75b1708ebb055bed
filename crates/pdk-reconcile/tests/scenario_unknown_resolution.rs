//! UNKNOWN orders resolve from broker truth; "not found" fails only after
//! the grace window.

use pdk_broker::{BrokerError, PaperBroker};
use pdk_cache::LiveStateCache;
use pdk_eventlog::{EventLogWriter, FsyncPolicy};
use pdk_oms::{OmsConfig, OrderEngine, RetryPolicy};
use pdk_reconcile::{ReconcileConfig, ReconcileOutcome, Reconciler};
use pdk_schemas::{OrderIntent, OrderState, OrderType, Side};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    broker: Arc<PaperBroker>,
    engine: Arc<OrderEngine<PaperBroker>>,
    reconciler: Reconciler<PaperBroker>,
    _dir: tempfile::TempDir,
}

fn rig(grace: Duration) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = Arc::new(OrderEngine::new(
        broker.clone(),
        log.clone(),
        cache.clone(),
        OmsConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                multiplier: 1.0,
                jitter: 0.0,
            },
            ..OmsConfig::default()
        },
    ));
    let reconciler = Reconciler::new(
        broker.clone(),
        engine.clone(),
        cache,
        log,
        ReconcileConfig {
            sweep_interval: Duration::from_secs(30),
            not_found_grace: grace,
        },
    );
    Rig {
        broker,
        engine,
        reconciler,
        _dir: dir,
    }
}

async fn park_unknown(rig: &Rig, cid: &str) {
    rig.broker.swallow_next_place();
    let handle = rig
        .engine
        .submit(OrderIntent {
            client_order_id: cid.to_string(),
            strategy_id: "momo".to_string(),
            signal_id: "sig-3".to_string(),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            qty: 5,
            order_type: OrderType::Market,
            limit_price_micros: None,
        })
        .await
        .unwrap();
    assert_eq!(handle.state, OrderState::Unknown);
}

#[tokio::test]
async fn unknown_resolves_to_filled_from_broker_view() {
    let rig = rig(Duration::from_secs(60));
    park_unknown(&rig, "C").await;

    // The broker actually filled it while we were blind.
    rig.broker.inject_fill("C", 5, "101.100000");

    let outcome = rig.reconciler.reconcile_one("C").await;
    assert_eq!(outcome, ReconcileOutcome::Resolved(OrderState::Filled));

    let order = rig.engine.order_by_client_id("C").await.unwrap();
    assert_eq!(order.filled_qty, 5);
    assert_eq!(order.avg_fill_price_micros, 101_100_000);
    assert!(rig.engine.unknown_orders().await.is_empty());
}

#[tokio::test]
async fn unknown_resolves_back_to_submitted_on_acceptance_evidence() {
    let rig = rig(Duration::from_secs(60));
    park_unknown(&rig, "S").await;

    // Broker view says "accepted": the order is alive after all.
    let outcome = rig.reconciler.reconcile_one("S").await;
    assert_eq!(outcome, ReconcileOutcome::Resolved(OrderState::Submitted));
}

#[tokio::test]
async fn not_found_fails_only_after_grace() {
    let rig = rig(Duration::from_secs(3600));
    park_unknown(&rig, "G").await;
    rig.broker.forget_order("G");

    // Inside the grace window: deferred, still UNKNOWN.
    let outcome = rig.reconciler.reconcile_one("G").await;
    assert_eq!(outcome, ReconcileOutcome::Deferred);
    assert_eq!(
        rig.engine.order_by_client_id("G").await.unwrap().state,
        OrderState::Unknown
    );

    // Zero-grace rig: not-found resolves FAILED immediately.
    let rig2 = rig_zero_grace().await;
    let outcome = rig2.reconciler.reconcile_one("Z").await;
    assert_eq!(outcome, ReconcileOutcome::Resolved(OrderState::Failed));
}

async fn rig_zero_grace() -> Rig {
    let r = rig(Duration::ZERO);
    park_unknown(&r, "Z").await;
    r.broker.forget_order("Z");
    r
}

#[tokio::test]
async fn transport_failure_defers_without_guessing() {
    let rig = rig(Duration::ZERO);
    park_unknown(&rig, "T").await;

    // The lookup itself fails: no evidence either way, so even with zero
    // grace the order must stay UNKNOWN.
    rig.broker.fail_next_lookup(BrokerError::Retriable("timeout".to_string()));
    let outcome = rig.reconciler.reconcile_one("T").await;
    assert_eq!(outcome, ReconcileOutcome::Deferred);
    assert_eq!(
        rig.engine.order_by_client_id("T").await.unwrap().state,
        OrderState::Unknown
    );
}
