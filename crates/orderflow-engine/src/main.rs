//! Order sync service entry point.

use anyhow::Result;
use clap::Parser;
use orderflow_engine::config::{EngineConfig, CONFIG_ENV};
use orderflow_engine::Engine;
use orderflow_core::Money;
use orderflow_store::{view, StoreChange};
use orderflow_telemetry::Metrics;
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Keeps a local order store in sync with the order backend.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via ORDERFLOW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any wss:// or https:// connection
    orderflow_feed::init_crypto();

    let args = Args::parse();

    // Determine config path: CLI arg > ORDERFLOW_CONFIG > default
    let config = match args.config.or_else(|| std::env::var(CONFIG_ENV).ok()) {
        Some(path) if Path::new(&path).exists() => EngineConfig::from_file(&path)?,
        Some(path) => anyhow::bail!("config file not found: {path}"),
        None => EngineConfig::load()?,
    }
    .with_env_overrides();

    orderflow_telemetry::init_logging(&config.telemetry.log_level)?;
    info!("Starting orderflow-sync v{}", env!("CARGO_PKG_VERSION"));
    info!(
        transport = ?config.transport,
        feed_url = %config.feed_url,
        poll_interval_ms = config.poll.interval_ms,
        "Configuration loaded"
    );

    let engine = Engine::new(config)?;
    let handle = engine.handle();

    let mut changes = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(StoreChange::Upserted { order, source }) => {
                    let amount = display_amount(order.amount.as_ref());
                    info!(
                        order_id = %order.id,
                        status = %order.status,
                        %amount,
                        source = source.as_str(),
                        "Order updated"
                    )
                }
                Ok(StoreChange::Removed { id }) => info!(order_id = %id, "Order removed"),
                Ok(StoreChange::SelectionCleared { id }) => {
                    info!(order_id = %id, "Selected order removed")
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Change log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            shutdown.shutdown();
        }
    });

    engine.run().await?;

    match Metrics::gather_text() {
        Ok(text) => debug!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }
    info!("Shutdown complete");
    Ok(())
}

/// Amount for log lines; orders first seen through a partial push carry none.
fn display_amount(amount: Option<&Money>) -> String {
    amount.map_or_else(|| "-".to_string(), view::format_amount)
}
