// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use anyhow::Result;
use tracing::{debug, error, info, warn};

/// Spawns all background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if ctx.config.metrics.enabled {
        let router = ctx.router.clone();
        let port = ctx.config.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(router, port, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Log Event Mirror ---
    // Protocol log events are also written to the process log.
    let mut subscription = ctx.router.events().subscribe();
    let mut shutdown_rx_mirror = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx_mirror.recv() => break,
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    if event.kind != "log" {
                        continue;
                    }
                    let connection = event.connection_id.as_deref().unwrap_or("-");
                    let message = event.field_str("message").unwrap_or_default();
                    match event.field_str("level").unwrap_or("info") {
                        "error" => error!(connection, "{}", message),
                        "warn" => warn!(connection, "{}", message),
                        _ => debug!(connection, "{}", message),
                    }
                }
            }
        }
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
