//! SOLSTICE — Autonomous Solana DeFi Agent Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores active agents from the store, and runs the fixed-cadence
//! scheduling loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use solstice::config::AppConfig;
use solstice::dashboard;
use solstice::engine::dispatcher::CycleDispatcher;
use solstice::engine::scheduler::{AgentScheduler, SchedulerConfig};
use solstice::providers::chain::JupiterExecutor;
use solstice::providers::market::PythMarketData;
use solstice::providers::predictor::HttpPredictor;
use solstice::providers::ExecutionProvider;
use solstice::storage::{AgentStore, SqliteStore};

const BANNER: &str = r#"
 ____   ___  _     ____ _____ ___ ____ _____
/ ___| / _ \| |   / ___|_   _|_ _/ ___| ____|
\___ \| | | | |   \___ \ | |  | | |   |  _|
 ___) | |_| | |___ ___) || |  | | |___| |___
|____/ \___/|_____|____/ |_| |___\____|_____|

  Autonomous Solana DeFi Agent Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        engine_name = %cfg.agent.name,
        tick_interval_secs = cfg.scheduler.tick_interval_secs,
        error_backoff_minutes = cfg.scheduler.error_backoff_minutes,
        "SOLSTICE starting up"
    );

    // -- Initialise components -------------------------------------------

    // Store
    let store = Arc::new(SqliteStore::connect(&cfg.database_url()).await?);

    // Market data (RPC URL is optional; the portfolio slice degrades)
    let rpc_url = cfg
        .chain
        .rpc_url_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let market = Arc::new(PythMarketData::new(
        cfg.market_data.pyth_endpoint.clone(),
        rpc_url,
        cfg.market_data.request_timeout_secs,
    )?);

    // Predictor
    let api_token = cfg
        .predictor
        .api_key_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let predictor = Arc::new(HttpPredictor::new(
        cfg.predictor.base_url.clone(),
        cfg.predictor.timeout_secs,
        api_token,
    )?);

    // Chain executor
    let executor: Arc<dyn ExecutionProvider> = Arc::new(JupiterExecutor::new(
        cfg.chain.jupiter_base_url.clone(),
        cfg.market_data.request_timeout_secs,
    )?);

    // Dispatcher + scheduler
    let dispatcher = CycleDispatcher::new(
        market,
        predictor,
        executor.clone(),
        store.clone(),
        std::time::Duration::from_secs(cfg.predictor.timeout_secs),
    );
    let scheduler = Arc::new(AgentScheduler::new(
        dispatcher,
        executor,
        SchedulerConfig::from_app(&cfg.scheduler),
    ));

    // -- Restore active agents from the store ------------------------------

    match store.list_active_agents().await {
        Ok(agents) => {
            let count = agents.len();
            for agent in agents {
                if let Err(e) = scheduler.register(&agent.id).await {
                    error!(agent_id = %agent.id, error = %e, "Failed to restore agent");
                    continue;
                }
                scheduler.activate(&agent.id).await;
            }
            info!(restored = count, "Active agents restored from store");
        }
        Err(e) => {
            error!(error = %e, "Failed to list active agents — starting with an empty table");
        }
    }

    // -- Dashboard ---------------------------------------------------------

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(scheduler.clone(), cfg.dashboard.port);
    }

    // -- Main loop ---------------------------------------------------------

    let mut interval = tokio::time::interval(scheduler.config().tick_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.scheduler.tick_interval_secs,
        "Entering scheduling loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let executed = scheduler.tick(chrono::Utc::now()).await;
                if !executed.is_empty() {
                    info!(executed = executed.len(), agents = ?executed, "Tick complete");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Close positions and stop every agent before exiting.
    scheduler.shutdown().await;
    info!("SOLSTICE shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("solstice=info"));

    let json_logging = std::env::var("SOLSTICE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
