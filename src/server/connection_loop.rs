// src/server/connection_loop.rs

//! Contains the main server loop for accepting clients and handling graceful shutdown.

use super::context::ServerContext;
use crate::config::Config;
use crate::connection::ConnectionHandler;
use crate::core::metrics;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// The main server loop that accepts clients and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut client_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    let (mut sigint, mut sigterm, mut sighup) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(int), Ok(term), Ok(hup)) => (int, term, hup),
        _ => {
            error!("Failed to register signal handlers; shutting down.");
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = sighup.recv() => {
                reload_log_level(&ctx);
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new client from: {}", addr);
                        metrics::CONNECTED_CLIENTS.inc();

                        client_id_counter = client_id_counter.wrapping_add(1);
                        let client_id = client_id_counter;
                        let router = ctx.router.clone();
                        let shutdown_rx = ctx.shutdown_tx.subscribe();

                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(socket, addr, router, client_id, shutdown_rx);
                            if let Err(e) = handler.run().await {
                                warn!("Client {} terminated unexpectedly: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept client: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    if tokio::time::timeout(Duration::from_secs(5), async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for clients; aborting them.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    // Every live handler must release its transport and sessions before exit.
    let disconnected = ctx.router.disconnect_all().await;
    info!("Disconnected {} live connection(s).", disconnected);

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}

/// Re-reads the config file and applies its `log_level`. `RUST_LOG` is not
/// consulted again.
fn reload_log_level(ctx: &ServerContext) {
    match Config::from_file(&ctx.config_path) {
        Ok(config) => match ctx
            .log_reload_handle
            .reload(EnvFilter::new(&config.log_level))
        {
            Ok(()) => info!("SIGHUP: log level set to '{}'.", config.log_level),
            Err(e) => warn!("SIGHUP: failed to apply log level: {}", e),
        },
        Err(e) => warn!("SIGHUP: could not reload configuration: {:#}", e),
    }
}
