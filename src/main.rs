//! Inventory gateway - RFID tag location and occupancy engine
//!
//! Module structure:
//! - `domain/` - Core types (reads, tags, lifecycle, mobility profiles, events)
//! - `io/` - External interfaces (event log, Prometheus endpoint, file helpers)
//! - `services/` - Business logic (inventory engine, location resolver, profiles)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use inventory_gateway::infra::{Config, Metrics};
use inventory_gateway::io::EventLog;
use inventory_gateway::services::InventoryEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Inventory gateway - tag location and occupancy tracking
#[derive(Parser, Debug)]
#[command(name = "inventory-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "inventory_gateway_starting");

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        ageout_hours = %config.ageout_hours(),
        aggregate_departed_threshold_ms = %config.aggregate_departed_threshold_ms(),
        pos_departed_threshold_ms = %config.pos_departed_threshold_ms(),
        pos_return_threshold_ms = %config.pos_return_threshold_ms(),
        cache_dir = %config.cache_dir().display(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let engine = InventoryEngine::new(config.clone(), metrics);

    if config.egress_enabled() {
        engine.subscribe(Arc::new(EventLog::new(config.events_file())));
    }

    engine.start();

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_engine = engine.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = inventory_gateway::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_engine,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "prometheus_server_error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let reporter_engine = engine.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => reporter_engine.metrics_report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    info!("inventory_gateway_running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");

    let _ = shutdown_tx.send(true);
    engine.stop().await;

    info!("inventory_gateway_shutdown_complete");
    Ok(())
}
