//! ARBITER: cross-outcome prediction market arbitrage.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the Polymarket provider, strategy, risk gate and paper executor
//! into the engine, and runs the scan loop until Ctrl+C.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use arbiter::config::AppConfig;
use arbiter::dashboard::{self, DashboardState};
use arbiter::engine::executor::PaperExecutor;
use arbiter::engine::{Engine, EngineConfig};
use arbiter::platforms::polymarket::PolymarketClient;
use arbiter::storage::JsonlDecisionLogger;
use arbiter::strategy::edge::{CrossOutcomeStrategy, EdgeConfig};
use arbiter::strategy::risk::{LimitsRiskManager, RiskConfig};

const BANNER: &str = r#"
    _    ____  ____ ___ _____ _____ ____
   / \  |  _ \| __ )_ _|_   _| ____|  _ \
  / _ \ | |_) |  _ \| |  | | |  _| | |_) |
 / ___ \|  _ <| |_) | |  | | | |___|  _ <
/_/   \_\_| \_\____/___| |_| |_____|_| \_\

  Cross-outcome arbitrage scanner
  v0.1.0 (paper trading)
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        AppConfig::resolve_env("ARBITER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        scan_interval_ms = cfg.engine.scan_interval_ms,
        max_concurrent_trades = cfg.engine.max_concurrent_trades,
        fetch_concurrency = cfg.engine.fetch_concurrency,
        min_edge_bps = cfg.strategy.min_edge_bps,
        "ARBITER starting up"
    );

    // -- Initialise components -------------------------------------------

    let provider = Arc::new(PolymarketClient::new(&cfg.polymarket)?);
    let strategy = Arc::new(CrossOutcomeStrategy::new(EdgeConfig::from(&cfg.strategy)));
    let risk = Arc::new(LimitsRiskManager::new(RiskConfig::from(&cfg.risk)));
    let executor = Arc::new(PaperExecutor::new());

    let mut engine = Engine::new(
        EngineConfig::from(&cfg.engine),
        provider,
        strategy,
        risk,
        executor,
    );

    let decisions_path = if cfg.storage.decisions_path.is_empty() {
        info!("Decision logging disabled");
        None
    } else {
        let path = PathBuf::from(&cfg.storage.decisions_path);
        info!(path = %path.display(), "Appending decisions");
        engine = engine.with_decision_logger(Arc::new(JsonlDecisionLogger::new(&path)));
        Some(path)
    };

    let engine = Arc::new(engine);

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(Arc::clone(&engine), decisions_path));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.start().await })
    };

    info!("Entering scan loop. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    engine.stop();

    if let Err(e) = runner.await {
        error!(error = %e, "Engine task panicked");
    }

    info!(
        scans = engine.scans_completed(),
        peak_active_trades = engine.peak_active_trades(),
        "ARBITER shut down cleanly."
    );
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbiter=info"));

    let json_logging = std::env::var("ARBITER_LOG_JSON").is_ok();

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
