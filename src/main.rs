//! Tag tracker - BLE tag sighting ingestion and derivation service
//!
//! Gateways post batches of advertisements; the service stores them and
//! serves current tag state, presence and history over HTTP.
//!
//! Module structure:
//! - `domain/` - Core types (sightings, gateways, derived state)
//! - `store/` - Event and gateway persistence (SQLite, in-memory)
//! - `services/` - Ingestion, derivation, gateway registry
//! - `io/` - HTTP API and Prometheus exposition
//! - `infra/` - Config and metrics

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tag_tracker::domain::clock::SystemClock;
use tag_tracker::infra::{Config, Metrics};
use tag_tracker::io::{start_api_server, ApiState};
use tag_tracker::store::SqliteStore;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Tag tracker - BLE tag sighting service
#[derive(Parser, Debug)]
#[command(name = "tag-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-record drop reasons and request logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "tag-tracker starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        database = %config.database_path(),
        presence_window_secs = %config.presence_window_secs(),
        history_default_limit = %config.history_default_limit(),
        history_max_limit = %config.history_max_limit(),
        "config_loaded"
    );

    let store = Arc::new(
        SqliteStore::open(config.database_path())
            .with_context(|| format!("Failed to open database {}", config.database_path()))?,
    );
    info!(schema_version = %store.schema_version()?, "store_opened");

    let metrics = Arc::new(Metrics::new());
    let state = Arc::new(ApiState::new(store, Arc::new(SystemClock), metrics.clone(), &config));

    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.port())
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address(), config.port()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Metrics reporter (lock-free reads)
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    start_api_server(addr, state, shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    info!("tag-tracker shutdown complete");
    Ok(())
}
