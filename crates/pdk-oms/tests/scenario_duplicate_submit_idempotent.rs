//! Two submits with the same client_order_id place exactly one broker
//! order and write exactly one ORDER_CREATED.

use pdk_broker::PaperBroker;
use pdk_cache::LiveStateCache;
use pdk_eventlog::{list_day_files, read_records, EventLogWriter, FsyncPolicy, RecordKind};
use pdk_oms::{OmsConfig, OrderEngine};
use pdk_schemas::{OrderIntent, OrderType, Side};
use std::sync::Arc;

#[tokio::test]
async fn duplicate_submit_returns_same_handle_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log.clone(), cache, OmsConfig::default());

    let intent = OrderIntent {
        client_order_id: "B".to_string(),
        strategy_id: "momo".to_string(),
        signal_id: "sig-7".to_string(),
        symbol: "MSFT".to_string(),
        side: Side::Buy,
        qty: 5,
        order_type: OrderType::Market,
        limit_price_micros: None,
    };

    let h1 = engine.submit(intent.clone()).await.unwrap();
    let h2 = engine.submit(intent).await.unwrap();

    assert_eq!(h1.order_id, h2.order_id);
    assert_eq!(h1.client_order_id, h2.client_order_id);
    assert_eq!(broker.order_count(), 1, "exactly one POST /orders");

    log.flush().unwrap();
    let files = list_day_files(dir.path()).unwrap();
    let records = read_records(&files[0]).unwrap();
    let created = records
        .iter()
        .filter(|r| r.kind == RecordKind::OrderCreated)
        .count();
    assert_eq!(created, 1, "one ORDER_CREATED in the event log");
}
