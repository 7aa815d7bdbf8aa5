//! Ingest command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use orderlake_core::{Config, IngestionEngine};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the ingestion engine until shutdown or a fatal error.
pub async fn run(config: Config) -> Result<()> {
    info!(
        topic = %config.kafka.topic,
        group = %config.kafka.consumer_group,
        root = %config.storage.root_path,
        "Starting ingestion engine"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let engine = IngestionEngine::new(config)?;
    let shutdown_tx = engine.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: Arc::clone(engine.health()),
        metrics: Arc::clone(engine.metrics()),
    });

    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(wait_for_signal(shutdown_tx.clone()));

    let result = engine.run().await;

    // Stop the HTTP servers even when the engine halted on its own
    let _ = shutdown_tx.send(());

    result?;
    info!("Ingestion engine stopped");
    Ok(())
}

/// Translate SIGINT or SIGTERM into a shutdown broadcast.
async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}
