//! Process wiring for `run-trading`.
//!
//! Task layout (one concern per task, bounded channels between them):
//! ingestion intake, decision loop (serial regime → strategy → risk →
//! intent), broker event consumer, reconciler timer, timeout scan,
//! broadcast pump, ETL worker, heartbeat, HTTP server. On halt the
//! decision loop stops producing, tasks drain, the event log flushes,
//! and the process reports how it ended.

use crate::broker_select::AnyBroker;
use crate::routes::build_router;
use crate::state::AppState;
use anyhow::{Context, Result};
use chrono::Utc;
use pdk_broadcast::{market_channel, BroadcastHub, CHANNEL_EQUITY, CHANNEL_HEALTH, CHANNEL_ORDERS, CHANNEL_POSITIONS, CHANNEL_REGIME};
use pdk_broker::{run_event_stream, HttpBroker, PaperBroker, StreamConfig, StreamSignal};
use pdk_cache::{logical_ts_now, LiveStateCache, Stamped};
use pdk_config::{BrokerCredentials, BrokerMode, LoadedConfig, TradingConfig};
use pdk_eventlog::{EventLogWriter, FsyncPolicy, RecordKind};
use pdk_oms::{derive_client_order_id, OmsConfig, OrderEngine, RetryPolicy};
use pdk_portfolio::Micros;
use pdk_reconcile::{ReconcileConfig, Reconciler};
use pdk_risk::{evaluate as risk_evaluate, record_reject, RequestKind, RiskConfig, RiskState, RiskVerdict};
use pdk_schemas::{Bar, Heartbeat, OrderIntent, OrderState, ProcessRole};
use pdk_strategy::{StrategyContext, StrategyRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// How the trading process ended; the CLI maps this onto exit codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Operator-initiated shutdown (signal or operator halt).
    Clean,
    /// The persistent halt flag was already set at startup.
    HaltedOnStart,
    /// The supervisor set the halt flag while we were running.
    SupervisorHalt,
}

/// Run the trading process to completion.
///
/// `creds` is required in http broker mode. `bars_rx`, when provided, is
/// the ingestion adapters' feed; bars flow to the event log, the mark
/// map, the strategy context, and the `market:{symbol}` channels.
pub async fn run_trading(
    cfg: TradingConfig,
    loaded: LoadedConfig,
    registry: StrategyRegistry,
    creds: Option<BrokerCredentials>,
    bars_rx: Option<mpsc::Receiver<Bar>>,
) -> Result<RunOutcome> {
    let cache = Arc::new(
        LiveStateCache::open(&cfg.storage.cache_root).context("open live-state cache mirror")?,
    );
    if cache.halt_active() {
        let halt = cache.halt().expect("halt_active implies flag");
        tracing::error!(
            reason = %halt.reason,
            set_by = %halt.set_by,
            "halt flag set; refusing to start (operator action required)"
        );
        return Ok(RunOutcome::HaltedOnStart);
    }

    let log = EventLogWriter::open(&cfg.storage.event_log_root, FsyncPolicy::default())
        .context("open event log")?;

    let run_id = uuid::Uuid::new_v4();
    log.append(
        RecordKind::Metric,
        serde_json::json!({
            "metric": "run_started",
            "run_id": run_id,
            "config_hash": loaded.config_hash,
        }),
    )?;
    tracing::info!(%run_id, config_hash = %loaded.config_hash, "trading process starting");

    // Broker backend. The stream shares the REST credential pair.
    let mut stream_creds: Option<BrokerCredentials> = None;
    let broker = Arc::new(match cfg.broker.mode {
        BrokerMode::Paper => AnyBroker::Paper(PaperBroker::new()),
        BrokerMode::Http => {
            let creds = creds.context("http broker mode requires credentials")?;
            stream_creds = Some(creds.clone());
            AnyBroker::Http(
                HttpBroker::new(
                    cfg.broker.base_url.clone(),
                    creds,
                    Duration::from_secs(cfg.broker.request_timeout_secs),
                )
                .map_err(|e| anyhow::anyhow!("build http broker: {e}"))?,
            )
        }
    });

    let engine = Arc::new(OrderEngine::new(
        broker.clone(),
        log.clone(),
        cache.clone(),
        OmsConfig {
            ack_timeout: Duration::from_secs(cfg.oms.ack_timeout_secs),
            zombie_timeout: Duration::from_secs(cfg.oms.zombie_timeout_secs),
            retry: RetryPolicy {
                max_attempts: cfg.oms.place_retry_max,
                ..RetryPolicy::default()
            },
            start_cash: Micros::from_units(100_000),
        },
    ));

    let reconciler = Arc::new(Reconciler::new(
        broker.clone(),
        engine.clone(),
        cache.clone(),
        log.clone(),
        ReconcileConfig {
            sweep_interval: Duration::from_secs(cfg.reconcile.sweep_interval_secs),
            not_found_grace: Duration::from_secs(cfg.reconcile.not_found_grace_secs),
        },
    ));

    let hub = Arc::new(BroadcastHub::new("pdk-daemon"));
    let app_state = Arc::new(AppState::new(run_id, cache.clone(), hub.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // HTTP server.
    let listener = tokio::net::TcpListener::bind(&cfg.daemon.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.daemon.bind_addr))?;
    tracing::info!("control surface on http://{}", cfg.daemon.bind_addr);
    {
        let router = build_router(app_state.clone())
            .layer(tower_http::trace::TraceLayer::new_for_http());
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await;
        });
    }

    // Shared recent-bars window for the strategy context.
    let bar_windows: Arc<Mutex<BTreeMap<String, Vec<Bar>>>> = Arc::new(Mutex::new(BTreeMap::new()));

    // Ingestion intake.
    if let Some(rx) = bars_rx {
        tokio::spawn(bar_intake(
            rx,
            log.clone(),
            engine.clone(),
            hub.clone(),
            bar_windows.clone(),
            shutdown_rx.clone(),
        ));
    }

    // Broker events.
    match cfg.broker.mode {
        BrokerMode::Paper => {
            tokio::spawn(paper_event_pump(
                broker.clone(),
                engine.clone(),
                shutdown_rx.clone(),
            ));
        }
        BrokerMode::Http => {
            let creds = stream_creds.take().expect("set in http mode above");
            let (tx, rx) = mpsc::channel(1024);
            let stream_cfg = StreamConfig {
                url: cfg.broker.stream_url.clone(),
                key_id: creds.key_id,
                secret: creds.secret,
                reconnect_delay: Duration::from_secs(2),
            };
            tokio::spawn(run_event_stream(stream_cfg, tx, shutdown_rx.clone()));
            tokio::spawn(stream_consumer(
                rx,
                engine.clone(),
                reconciler.clone(),
                shutdown_rx.clone(),
            ));
        }
    }

    // Decision loop.
    tokio::spawn(decision_loop(
        engine.clone(),
        cache.clone(),
        log.clone(),
        registry,
        RiskConfig {
            max_position_bps: cfg.risk.max_position_bps,
            max_open_orders: cfg.risk.max_open_orders,
            reject_storm_limit: cfg.risk.reject_storm_limit,
        },
        bar_windows,
        Duration::from_secs(cfg.daemon.decision_interval_secs),
        shutdown_rx.clone(),
    ));

    // Reconciler timer.
    {
        let reconciler = reconciler.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reconciler.sweep_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = reconciler.sweep().await;
                        if report.orders_resolved > 0 || !report.positions_overwritten.is_empty() {
                            tracing::info!(?report, "reconcile sweep");
                        }
                    }
                    _ = rx.changed() => return,
                }
            }
        });
    }

    // Timeout / zombie scan.
    {
        let engine = engine.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let zombies = engine.scan_timeouts().await;
                        for order_id in zombies {
                            tracing::warn!(%order_id, "zombie order escalated");
                        }
                    }
                    _ = rx.changed() => return,
                }
            }
        });
    }

    // Broadcast pump.
    tokio::spawn(broadcast_pump(
        engine.clone(),
        cache.clone(),
        hub.clone(),
        shutdown_rx.clone(),
    ));

    // Heartbeats.
    tokio::spawn(heartbeat_task(
        cache.clone(),
        log.clone(),
        Duration::from_secs(cfg.daemon.heartbeat_interval_secs),
        shutdown_rx.clone(),
    ));

    // ETL worker.
    if cfg.analytics.enabled {
        if let Some(url) = pdk_config::analytics_database_url() {
            tokio::spawn(etl_task(
                url,
                cfg.storage.event_log_root.clone(),
                Duration::from_secs(cfg.analytics.etl_interval_secs),
                shutdown_rx.clone(),
            ));
        } else {
            tracing::warn!("analytics enabled but PDK_ANALYTICS_DATABASE_URL unset; ETL disabled");
        }
    }

    // Block until a signal or the halt flag.
    let outcome = wait_for_shutdown(&cache).await;

    tracing::info!(?outcome, "draining");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(250)).await;
    log.flush().ok();

    Ok(outcome)
}

async fn wait_for_shutdown(cache: &LiveStateCache) -> RunOutcome {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("signal received; shutting down");
                return RunOutcome::Clean;
            }
            _ = ticker.tick() => {
                // The supervisor halts us through the mirror.
                if let Err(e) = cache.refresh_from_mirror() {
                    tracing::warn!("mirror refresh failed: {e:#}");
                }
                if let Some(halt) = cache.halt() {
                    if halt.active {
                        tracing::error!(reason = %halt.reason, set_by = %halt.set_by, "halt observed");
                        return if halt.set_by == "supervisor" {
                            RunOutcome::SupervisorHalt
                        } else {
                            RunOutcome::Clean
                        };
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn bar_intake(
    mut rx: mpsc::Receiver<Bar>,
    log: EventLogWriter,
    engine: Arc<OrderEngine<AnyBroker>>,
    hub: Arc<BroadcastHub>,
    windows: Arc<Mutex<BTreeMap<String, Vec<Bar>>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    const WINDOW: usize = 512;
    loop {
        let bar = tokio::select! {
            b = rx.recv() => match b { Some(b) => b, None => return },
            _ = shutdown.changed() => return,
        };

        if let Err(e) = log.append(
            RecordKind::Bar,
            serde_json::to_value(&bar).expect("bar serializes"),
        ) {
            tracing::error!("bar append failed: {e:#}");
        }
        engine
            .update_marks(&[(bar.symbol.clone(), bar.close_micros)])
            .await;
        {
            let mut w = windows.lock().await;
            let v = w.entry(bar.symbol.clone()).or_default();
            v.push(bar.clone());
            if v.len() > WINDOW {
                let cut = v.len() - WINDOW;
                v.drain(..cut);
            }
        }
        hub.publish(
            &market_channel(&bar.symbol),
            serde_json::to_value(&bar).expect("bar serializes"),
        );
    }
}

/// Paper mode has no socket; the "stream" is the paper broker's event
/// queue, drained on a short interval.
async fn paper_event_pump(
    broker: Arc<AnyBroker>,
    engine: Arc<OrderEngine<AnyBroker>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(paper) = broker.paper() else { return };
                for ev in paper.take_events() {
                    if let Err(e) = engine.on_broker_event(&ev).await {
                        tracing::warn!("paper event refused: {e}");
                    }
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn stream_consumer(
    mut rx: mpsc::Receiver<StreamSignal>,
    engine: Arc<OrderEngine<AnyBroker>>,
    reconciler: Arc<Reconciler<AnyBroker>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let signal = tokio::select! {
            s = rx.recv() => match s { Some(s) => s, None => return },
            _ = shutdown.changed() => return,
        };
        match signal {
            StreamSignal::Resynced => {
                tracing::warn!("stream reconnected; full reconcile before resuming");
                reconciler.reconcile_all().await;
            }
            StreamSignal::Event(ev) => {
                if let Err(e) = engine.on_broker_event(&ev).await {
                    tracing::warn!(client_order_id = %ev.client_order_id, "event refused: {e}");
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn decision_loop(
    engine: Arc<OrderEngine<AnyBroker>>,
    cache: Arc<LiveStateCache>,
    log: EventLogWriter,
    mut registry: StrategyRegistry,
    risk_cfg: RiskConfig,
    windows: Arc<Mutex<BTreeMap<String, Vec<Bar>>>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut risk_state = RiskState::default();
    let mut ticker = tokio::time::interval(interval);
    let interval_secs = interval.as_secs().max(1) as i64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        // Equity is recomputed every tick, halted or not.
        engine.publish_equity().await;

        if cache.halt_active() {
            continue;
        }
        if registry.is_empty() {
            continue;
        }

        let snapshot = engine.snapshot().await;
        let regime = cache.regime().unwrap_or_default();
        let decision_ts_bucket = Utc::now().timestamp() / interval_secs;

        let ctx = StrategyContext {
            regime,
            bars: windows.lock().await.clone(),
            positions: snapshot
                .positions
                .iter()
                .map(|p| (p.symbol.clone(), p.net_qty))
                .collect(),
            decision_ts_bucket,
        };

        for (strategy_id, signal) in registry.produce_all(&ctx) {
            let _ = log.append(
                RecordKind::Signal,
                serde_json::json!({
                    "strategy_id": strategy_id,
                    "signal_id": signal.signal_id,
                    "symbol": signal.symbol,
                    "side": signal.side,
                    "qty": signal.qty,
                }),
            );

            let client_order_id = derive_client_order_id(
                &strategy_id,
                &signal.signal_id,
                &signal.symbol,
                signal.side,
                signal.qty,
                decision_ts_bucket,
            );

            let mark = ctx
                .bars
                .get(&signal.symbol)
                .and_then(|v| v.last())
                .map(|b| b.close_micros)
                .or(signal.limit_price_micros)
                .unwrap_or(0);
            let current_net_qty = ctx.positions.get(&signal.symbol).copied().unwrap_or(0);

            let verdict = risk_evaluate(
                &risk_cfg,
                &mut risk_state,
                &pdk_risk::RiskInput {
                    request: RequestKind::NewOrder,
                    symbol: signal.symbol.clone(),
                    side: signal.side,
                    qty: signal.qty,
                    mark_price_micros: mark,
                    current_net_qty,
                    equity_micros: snapshot.equity.equity_micros,
                    open_orders: engine.open_order_count().await,
                    halt_active: cache.halt_active(),
                    reject_window_id: Utc::now().timestamp() / 60,
                },
            );

            let _ = log.append(
                RecordKind::Intent,
                serde_json::json!({
                    "strategy_id": strategy_id,
                    "signal_id": signal.signal_id,
                    "client_order_id": client_order_id,
                    "symbol": signal.symbol,
                    "side": signal.side,
                    "qty": signal.qty,
                    "verdict": format!("{verdict:?}"),
                }),
            );

            let RiskVerdict::Approve = verdict else {
                tracing::info!(?verdict, symbol = %signal.symbol, "intent rejected by risk");
                continue;
            };

            let intent = OrderIntent {
                client_order_id,
                strategy_id: strategy_id.clone(),
                signal_id: signal.signal_id.clone(),
                symbol: signal.symbol.clone(),
                side: signal.side,
                qty: signal.qty,
                order_type: signal.order_type,
                limit_price_micros: signal.limit_price_micros,
            };
            match engine.submit(intent).await {
                Ok(handle) if handle.state == OrderState::Rejected => {
                    record_reject(&risk_cfg, &mut risk_state);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("submit failed: {e}"),
            }
        }
    }
}

async fn broadcast_pump(
    engine: Arc<OrderEngine<AnyBroker>>,
    cache: Arc<LiveStateCache>,
    hub: Arc<BroadcastHub>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut dirty = engine.subscribe_dirty();
    loop {
        tokio::select! {
            changed = dirty.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }

        let snapshot = engine.snapshot().await;
        hub.publish(
            CHANNEL_ORDERS,
            serde_json::json!({ "orders": snapshot.orders }),
        );
        hub.publish(
            CHANNEL_POSITIONS,
            serde_json::json!({ "positions": snapshot.positions }),
        );
        hub.publish(
            CHANNEL_EQUITY,
            serde_json::to_value(&snapshot.equity).expect("equity serializes"),
        );
        if let Some(regime) = cache.regime() {
            hub.publish(CHANNEL_REGIME, serde_json::json!({ "regime": regime }));
        }
        hub.publish(
            CHANNEL_HEALTH,
            serde_json::json!({
                "halt": cache.halt(),
                "ts": Utc::now(),
            }),
        );
    }
}

async fn heartbeat_task(
    cache: Arc<LiveStateCache>,
    log: EventLogWriter,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut seq = 0u64;
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        seq += 1;
        let hb = Heartbeat {
            process_id: std::process::id(),
            role: ProcessRole::Trading,
            ts: Utc::now(),
            seq,
        };
        let _ = log.append(
            RecordKind::Heartbeat,
            serde_json::json!({"role": "trading", "seq": seq, "pid": hb.process_id}),
        );
        cache.put_heartbeat(Stamped::new(logical_ts_now(), seq, hb));
    }
}

async fn etl_task(
    database_url: String,
    el_root: std::path::PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("analytics pool connect failed: {e}; ETL disabled");
            return;
        }
    };
    if let Err(e) = pdk_store::ensure_schema(&pool).await {
        tracing::error!("analytics schema failed: {e:#}; ETL disabled");
        return;
    }
    let worker = pdk_store::EtlWorker::new(pool);

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match worker.run_once(&el_root).await {
                    Ok(stats) => tracing::debug!(?stats, "etl pass"),
                    Err(e) => tracing::warn!("etl pass failed: {e:#}"),
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
