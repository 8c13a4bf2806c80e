//! Agricultural ledger node binary
//!
//! Usage: `agri-ledger-node [config.toml]`. Without a path the configuration
//! is read from `AGRI_LEDGER_*` environment variables.

use agri_ledger::{Config, Ledger};
use anyhow::Context;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting agricultural supply-chain ledger"
    );

    // Open ledger
    let ledger = Ledger::open(config).await.context("Failed to open ledger")?;
    tracing::info!(commit_height = ledger.commit_height()?, "Ledger opened successfully");

    let mut events = ledger.subscribe_stream();
    let event_log = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(emitted) => {
                    let payload = emitted
                        .event
                        .payload()
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .unwrap_or_default();
                    tracing::info!(
                        event = emitted.event.name(),
                        tx_id = %emitted.tx_id,
                        commit_seq = emitted.commit_seq,
                        %payload,
                        "Event"
                    );
                }
                Err(e) => tracing::warn!("Event subscriber lagged: {}", e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger node");
    tracing::debug!("Final metrics:\n{}", ledger.metrics().render());
    ledger.shutdown().await?;
    event_log.abort();
    Ok(())
}
