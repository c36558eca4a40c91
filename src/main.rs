//! HARVESTER — Yield Opportunity Lifecycle Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or starts fresh), and runs the
//! settle→enter tick loop until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use harvester::clock::SystemClock;
use harvester::config::{self, SourceConfig};
use harvester::dashboard;
use harvester::engine::Engine;
use harvester::sources::{HttpSource, JsonFileSource, OpportunitySource};
use harvester::storage::JsonFileStore;

const BANNER: &str = r#"
 _   _    _    ______     _______ ____ _____ _____ ____
| | | |  / \  |  _ \ \   / / ____/ ___|_   _| ____|  _ \
| |_| | / _ \ | |_) \ \ / /|  _| \___ \ | | |  _| | |_) |
|  _  |/ ___ \|  _ < \ V / | |___ ___) || | | |___|  _ <
|_| |_/_/   \_\_| \_\ \_/  |_____|____/ |_| |_____|_| \_\

  Yield Opportunity Lifecycle Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        entry_yield_threshold = cfg.engine.entry_yield_threshold,
        committed_amount = cfg.engine.committed_amount,
        hold_duration_hours = cfg.engine.hold_duration_hours,
        max_open_positions = cfg.engine.max_open_positions,
        tick_interval_minutes = cfg.engine.tick_interval_minutes,
        "HARVESTER starting up"
    );

    // -- Components ------------------------------------------------------

    let source = build_source(&cfg)?;
    info!(source = source.name(), "Opportunity source ready");

    let store = Arc::new(JsonFileStore::new(&cfg.storage.state_file));
    let engine = Arc::new(Engine::new(
        cfg.engine.clone(),
        source,
        store,
        Arc::new(SystemClock),
    ));

    engine.initialize().await?;

    if cfg.dashboard.enabled {
        if let Err(e) = dashboard::spawn_dashboard(engine.clone(), cfg.dashboard.port).await {
            error!(error = %e, "Dashboard failed to start, continuing without it");
        }
    }

    // -- Run -------------------------------------------------------------

    engine.start().await;
    info!(
        interval_minutes = cfg.engine.tick_interval_minutes,
        "Engine running. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    engine.stop().await;

    let status = engine.status().await;
    info!(
        open = status.open_count,
        settled = status.stats.total_settled,
        win_rate = format!("{:.1}%", status.stats.win_rate()),
        net = format!("${:.2}", status.stats.net_pnl()),
        "HARVESTER shut down cleanly"
    );

    Ok(())
}

fn build_source(cfg: &config::AppConfig) -> Result<Arc<dyn OpportunitySource>> {
    let source: Arc<dyn OpportunitySource> = match &cfg.source {
        SourceConfig::File { path } => Arc::new(JsonFileSource::new(path)),
        SourceConfig::Http { url } => Arc::new(HttpSource::with_timeout(
            url.clone(),
            cfg.engine.source_timeout(),
        )?),
    };
    Ok(source)
}

/// Initialise tracing with env-filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harvester=info"));

    if std::env::var("HARVESTER_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
