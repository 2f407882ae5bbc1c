// src/server/initialization.rs

//! Handles the complete server initialization process: opening the connection
//! store, building the router and binding the front-door listener.

use super::context::{LogReloadHandle, ServerContext};
use crate::config::Config;
use crate::core::handlers::HandlerRegistry;
use crate::core::store::{StoreBackend, open_store};
use crate::core::{EventBroadcaster, OperationRouter};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    config_path: String,
    log_reload_handle: LogReloadHandle,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    prepare_store_directory(&config).await?;
    let store = open_store(config.store.backend, &config.store.path)
        .await
        .map_err(|e| anyhow!("Failed to open connection store: {}", e))?;

    let registry = HandlerRegistry::with_defaults();
    let protocols: Vec<String> = registry
        .catalog()
        .iter()
        .map(|(protocol, _)| protocol.to_string())
        .collect();
    info!("Registered protocols: {}", protocols.join(", "));

    let router = Arc::new(OperationRouter::new(
        store,
        registry,
        EventBroadcaster::new(config.events.channel_capacity),
        config.handler_settings(),
        config.router_settings(),
    ));

    // Live handler state never survives a restart.
    match router.reset_statuses().await {
        Ok(0) => {}
        Ok(n) => info!("Reset {} stale connection statuses to disconnected.", n),
        Err(e) => warn!("Could not reset stored connection statuses: {}", e),
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Unicon listening on {}:{}", config.host, config.port);

    Ok(ServerContext {
        config,
        config_path,
        router,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        log_reload_handle,
    })
}

/// Creates the parent directory of a file-backed store.
async fn prepare_store_directory(config: &Config) -> Result<()> {
    if config.store.backend == StoreBackend::Memory {
        return Ok(());
    }
    if let Some(parent) = config.store.path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            anyhow!(
                "Failed to create store directory '{}': {}",
                parent.display(),
                e
            )
        })?;
        info!("Created store directory: {}", parent.display());
    }
    Ok(())
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("WARNING: Using the in-memory store. Connections are lost on exit.")
        }
        backend => info!(
            "Connection store: {:?} at {}",
            backend,
            config.store.path.display()
        ),
    }
    info!(
        "Default timeouts: connect {:?}, operation {:?}, disconnect {:?}.",
        config.timeouts.connect, config.timeouts.operation, config.timeouts.disconnect
    );
}
