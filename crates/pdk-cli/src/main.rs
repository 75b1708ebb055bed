//! pdk — process entry points.
//!
//! Exactly two long-running commands:
//!   pdk run-trading    --config base.yaml [--config override.yaml ...]
//!   pdk run-supervisor --config base.yaml [...]
//!
//! Exit codes:
//!   0  normal shutdown
//!   2  configuration error (bad file, missing credentials)
//!   3  halt flag set on start
//!   4  supervisor-initiated termination
//!   5  unrecoverable internal error

use clap::{Parser, Subcommand};
use pdk_broker::PaperBroker;
use pdk_cache::LiveStateCache;
use pdk_config::{BrokerCredentials, BrokerMode};
use pdk_daemon::{run_trading, AnyBroker, RunOutcome};
use pdk_eventlog::{EventLogWriter, FsyncPolicy};
use pdk_strategy::StrategyRegistry;
use pdk_supervisor::{ActuatorConfig, KillConfig, ShutdownActuator, Supervisor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 2;
const EXIT_HALTED_ON_START: i32 = 3;
const EXIT_SUPERVISOR_TERMINATED: i32 = 4;
const EXIT_INTERNAL: i32 = 5;

#[derive(Parser)]
#[command(name = "pdk", about = "PaperDesk trading control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading process.
    RunTrading {
        /// Layered YAML config files; later files override earlier ones.
        #[arg(long = "config", required = true)]
        config: Vec<PathBuf>,
    },
    /// Run the independent supervisor.
    RunSupervisor {
        #[arg(long = "config", required = true)]
        config: Vec<PathBuf>,
    },
}

fn main() {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::RunTrading { config } => run_trading_cmd(&config),
        Command::RunSupervisor { config } => run_supervisor_cmd(&config),
    };
    std::process::exit(code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn as_path_refs(paths: &[PathBuf]) -> Vec<&Path> {
    paths.iter().map(|p| p.as_path()).collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("build tokio runtime")
}

// ---------------------------------------------------------------------------
// run-trading
// ---------------------------------------------------------------------------

fn run_trading_cmd(paths: &[PathBuf]) -> i32 {
    let (cfg, loaded) = match pdk_config::load_trading_config(&as_path_refs(paths)) {
        Ok(x) => x,
        Err(e) => {
            tracing::error!("config error: {e:#}");
            return EXIT_CONFIG;
        }
    };

    let creds = match cfg.broker.mode {
        BrokerMode::Paper => None,
        BrokerMode::Http => match BrokerCredentials::from_env("PDK_TRADING") {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::error!("credential error: {e:#}");
                return EXIT_CONFIG;
            }
        },
    };

    // Strategy implementations are registered here by deployments that
    // link them in; the stock binary trades nothing on its own.
    let registry = StrategyRegistry::new();

    match runtime().block_on(run_trading(cfg, loaded, registry, creds, None)) {
        Ok(RunOutcome::Clean) => EXIT_OK,
        Ok(RunOutcome::HaltedOnStart) => EXIT_HALTED_ON_START,
        Ok(RunOutcome::SupervisorHalt) => EXIT_SUPERVISOR_TERMINATED,
        Err(e) => {
            tracing::error!("trading process failed: {e:#}");
            EXIT_INTERNAL
        }
    }
}

// ---------------------------------------------------------------------------
// run-supervisor
// ---------------------------------------------------------------------------

fn run_supervisor_cmd(paths: &[PathBuf]) -> i32 {
    let (cfg, _loaded) = match pdk_config::load_supervisor_config(&as_path_refs(paths)) {
        Ok(x) => x,
        Err(e) => {
            tracing::error!("config error: {e:#}");
            return EXIT_CONFIG;
        }
    };

    let broker = match cfg.broker.mode {
        BrokerMode::Paper => Arc::new(AnyBroker::Paper(PaperBroker::new())),
        BrokerMode::Http => {
            // The supervisor's credential pair is distinct from trading's.
            let creds = match BrokerCredentials::from_env("PDK_SUPERVISOR") {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("credential error: {e:#}");
                    return EXIT_CONFIG;
                }
            };
            match pdk_broker::HttpBroker::new(
                cfg.broker.base_url.clone(),
                creds,
                Duration::from_secs(cfg.broker.request_timeout_secs),
            ) {
                Ok(b) => Arc::new(AnyBroker::Http(b)),
                Err(e) => {
                    tracing::error!("broker setup failed: {e}");
                    return EXIT_CONFIG;
                }
            }
        }
    };

    let result = runtime().block_on(async move {
        let cache = Arc::new(LiveStateCache::open(&cfg.storage.cache_root)?);
        let log = EventLogWriter::open(&cfg.storage.event_log_root, FsyncPolicy::default())?;

        let actuator = ShutdownActuator::new(
            broker.clone(),
            cache.clone(),
            log,
            ActuatorConfig {
                grace: Duration::from_secs(cfg.kill.grace_secs),
                trading_api_url: cfg.trading_api_url.clone(),
                terminate_trading: true,
            },
        );
        let supervisor = Supervisor::new(
            broker,
            cache,
            actuator,
            KillConfig {
                daily_loss_bps: cfg.kill.daily_loss_bps,
                max_drawdown_bps: cfg.kill.max_drawdown_bps,
                concentration_bps: cfg.kill.concentration_bps,
                zombie_secs: cfg.kill.zombie_secs as i64,
                heartbeat_stale_secs: cfg.kill.heartbeat_stale_secs as i64,
                end_of_week_flatten: cfg.kill.end_of_week_flatten,
            },
            Duration::from_secs(cfg.kill.cycle_secs),
        );

        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("signal received; supervisor stopping");
            let _ = tx.send(true);
        });

        supervisor.run(rx).await;
        anyhow::Ok(())
    });

    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            tracing::error!("supervisor failed: {e:#}");
            EXIT_INTERNAL
        }
    }
}
