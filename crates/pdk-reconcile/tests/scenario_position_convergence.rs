//! Position divergence: broker truth overwrites the cache, the overwrite
//! is logged, and repeated passes change nothing at the broker.

use pdk_broker::{BrokerAdapter, PaperBroker};
use pdk_cache::LiveStateCache;
use pdk_eventlog::{list_day_files, read_records, EventLogWriter, FsyncPolicy, RecordKind};
use pdk_oms::{OmsConfig, OrderEngine};
use pdk_reconcile::{ReconcileConfig, Reconciler};
use std::sync::Arc;

struct Rig {
    broker: Arc<PaperBroker>,
    cache: Arc<LiveStateCache>,
    reconciler: Reconciler<PaperBroker>,
    log: EventLogWriter,
    dir: tempfile::TempDir,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = Arc::new(OrderEngine::new(
        broker.clone(),
        log.clone(),
        cache.clone(),
        OmsConfig::default(),
    ));
    let reconciler = Reconciler::new(
        broker.clone(),
        engine,
        cache.clone(),
        log.clone(),
        ReconcileConfig::default(),
    );
    Rig {
        broker,
        cache,
        reconciler,
        log,
        dir,
    }
}

#[tokio::test]
async fn divergence_is_overwritten_logged_and_converges() {
    let rig = rig();

    // Broker says +10 AAPL; the cache knows nothing about it.
    rig.broker.set_position("AAPL", 10, "150.000000");

    let overwritten = rig.reconciler.reconcile_positions().await;
    assert_eq!(overwritten, vec!["AAPL".to_string()]);

    let pos = rig.cache.position("AAPL").unwrap();
    assert_eq!(pos.net_qty, 10);
    assert_eq!(pos.avg_cost_micros, 150_000_000);

    // POSITION_RECONCILED reached the event log.
    rig.log.flush().unwrap();
    let files = list_day_files(rig.dir.path()).unwrap();
    let records = read_records(&files[0]).unwrap();
    let reconciled: Vec<_> = records
        .iter()
        .filter(|r| r.kind == RecordKind::PositionReconciled)
        .collect();
    assert_eq!(reconciled.len(), 1);
    assert_eq!(reconciled[0].data["symbol"], "AAPL");
    assert_eq!(reconciled[0].data["broker_qty"], 10);

    // Second pass: already converged, nothing to do.
    let again = rig.reconciler.reconcile_positions().await;
    assert!(again.is_empty());
}

#[tokio::test]
async fn broker_flat_zeroes_a_stale_local_position() {
    let rig = rig();

    rig.broker.set_position("MSFT", 4, "300.000000");
    rig.reconciler.reconcile_positions().await;
    assert_eq!(rig.cache.position("MSFT").unwrap().net_qty, 4);

    // Broker goes flat; local must follow.
    rig.broker.set_position("MSFT", 0, "0.000000");
    let overwritten = rig.reconciler.reconcile_positions().await;
    assert_eq!(overwritten, vec!["MSFT".to_string()]);
    assert_eq!(rig.cache.position("MSFT").unwrap().net_qty, 0);
}

#[tokio::test]
async fn sweeps_cause_no_broker_side_effects() {
    let rig = rig();

    // An open order and a position at the broker.
    rig.broker
        .place(&pdk_broker::PlaceOrderRequest {
            client_order_id: "X".to_string(),
            symbol: "AAPL".to_string(),
            qty: 10,
            side: pdk_schemas::Side::Buy,
            order_type: pdk_schemas::OrderType::Market,
            limit_price: None,
        })
        .await
        .unwrap();
    rig.broker.set_position("AAPL", 3, "100.000000");

    let before_orders = rig.broker.order_count();
    let before_status = rig.broker.get_order("X").await.unwrap().unwrap().status;

    for _ in 0..5 {
        rig.reconciler.sweep().await;
    }

    assert_eq!(rig.broker.order_count(), before_orders);
    assert_eq!(
        rig.broker.get_order("X").await.unwrap().unwrap().status,
        before_status,
        "reconciliation never cancels or resubmits"
    );
}
