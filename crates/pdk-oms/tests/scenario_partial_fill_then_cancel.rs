//! Partial fill, operator cancel, broker confirms cancel of the rest.

use pdk_broker::PaperBroker;
use pdk_cache::LiveStateCache;
use pdk_eventlog::{EventLogWriter, FsyncPolicy};
use pdk_oms::{OmsConfig, OmsError, OrderEngine};
use pdk_schemas::{OrderIntent, OrderState, OrderType, Side};
use std::sync::Arc;

async fn drain<B: pdk_broker::BrokerAdapter>(broker: &PaperBroker, engine: &OrderEngine<B>) {
    for ev in broker.take_events() {
        let _ = engine.on_broker_event(&ev).await;
    }
}

#[tokio::test]
async fn partial_then_cancel_keeps_partial_quantity() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log, cache, OmsConfig::default());

    let handle = engine
        .submit(OrderIntent {
            client_order_id: "D".to_string(),
            strategy_id: "momo".to_string(),
            signal_id: "sig-4".to_string(),
            symbol: "NVDA".to_string(),
            side: Side::Buy,
            qty: 10,
            order_type: OrderType::Market,
            limit_price_micros: None,
        })
        .await
        .unwrap();

    broker.inject_fill("D", 6, "200.000000");
    drain(&broker, &engine).await;
    assert_eq!(
        engine.order_by_client_id("D").await.unwrap().state,
        OrderState::PartialFill
    );

    // Operator cancels; engine enters CANCELLING and asks the broker.
    let h = engine.cancel(&handle.order_id).await.unwrap();
    assert_eq!(h.state, OrderState::Cancelling);

    // Broker confirms cancel of the remainder.
    broker.confirm_cancel("D");
    drain(&broker, &engine).await;

    let order = engine.order_by_client_id("D").await.unwrap();
    assert_eq!(order.state, OrderState::Cancelled);
    assert_eq!(order.filled_qty, 6);
    assert_eq!(order.avg_fill_price_micros, 200_000_000);
}

#[tokio::test]
async fn cancel_from_terminal_state_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new());
    let log = EventLogWriter::open(dir.path(), FsyncPolicy::default()).unwrap();
    let cache = Arc::new(LiveStateCache::in_memory());
    let engine = OrderEngine::new(broker.clone(), log, cache, OmsConfig::default());

    let handle = engine
        .submit(OrderIntent {
            client_order_id: "E".to_string(),
            strategy_id: "momo".to_string(),
            signal_id: "sig-5".to_string(),
            symbol: "AAPL".to_string(),
            side: Side::Sell,
            qty: 3,
            order_type: OrderType::Market,
            limit_price_micros: None,
        })
        .await
        .unwrap();

    broker.inject_fill("E", 3, "99.000000");
    drain(&broker, &engine).await;

    let err = engine.cancel(&handle.order_id).await.unwrap_err();
    assert!(matches!(
        err,
        OmsError::NotCancellable {
            state: OrderState::Filled,
            ..
        }
    ));
}
