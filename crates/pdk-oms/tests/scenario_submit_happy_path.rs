//! Market buy, ack, full fill: the straight-through path.

use pdk_broker::{BrokerAdapter, PaperBroker};
use pdk_cache::LiveStateCache;
use pdk_eventlog::{list_day_files, read_records, EventLogWriter, FsyncPolicy, RecordKind};
use pdk_oms::{OmsConfig, OrderEngine};
use pdk_schemas::{OrderIntent, OrderState, OrderType, Side};
use std::sync::Arc;

fn intent(cid: &str, qty: i64) -> OrderIntent {
    OrderIntent {
        client_order_id: cid.to_string(),
        strategy_id: "momo".to_string(),
        signal_id: "sig-1".to_string(),
        symbol: "AAPL".to_string(),
        side: Side::Buy,
        qty,
        order_type: OrderType::Market,
        limit_price_micros: None,
    }
}

#[tokio::test]
async fn submit_ack_fill_reaches_filled_with_position() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log.clone(), cache.clone(), OmsConfig::default());

    let handle = engine.submit(intent("A", 10)).await.unwrap();
    assert_eq!(handle.state, OrderState::Submitted);

    broker.inject_fill("A", 10, "150.000000");
    for ev in broker.take_events() {
        engine.on_broker_event(&ev).await.unwrap();
    }

    let order = engine.order_by_client_id("A").await.unwrap();
    assert_eq!(order.state, OrderState::Filled);
    assert_eq!(order.filled_qty, 10);
    assert_eq!(order.avg_fill_price_micros, 150_000_000);
    assert_eq!(order.broker_ref.as_deref(), Some("paper:A"));

    // Position AAPL = +10 @ 150.
    let snap = engine.snapshot().await;
    assert_eq!(snap.positions.len(), 1);
    assert_eq!(snap.positions[0].symbol, "AAPL");
    assert_eq!(snap.positions[0].net_qty, 10);
    assert_eq!(snap.positions[0].avg_cost_micros, 150_000_000);

    // The cache saw the same truth.
    assert_eq!(cache.position("AAPL").unwrap().net_qty, 10);
    assert_eq!(cache.order(&order.order_id).unwrap().state, OrderState::Filled);

    // Event log: one ORDER_CREATED, one FILL, and the transitions.
    log.flush().unwrap();
    let files = list_day_files(dir.path()).unwrap();
    let records = read_records(&files[0]).unwrap();
    let count = |k: RecordKind| records.iter().filter(|r| r.kind == k).count();
    assert_eq!(count(RecordKind::OrderCreated), 1);
    assert_eq!(count(RecordKind::Fill), 1);
    assert!(count(RecordKind::OrderTransition) >= 2); // ack + fill
}

#[tokio::test]
async fn limit_without_price_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log, cache, OmsConfig::default());

    let mut bad = intent("B", 10);
    bad.order_type = OrderType::Limit;
    let err = engine.submit(bad).await.unwrap_err();
    assert!(matches!(err, pdk_oms::OmsError::BadRequest(_)));
    assert_eq!(broker.order_count(), 0);
    assert!(broker.get_order("B").await.unwrap().is_none());
}
