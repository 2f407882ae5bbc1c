// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, reload};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::LogReloadHandle;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    config_path: String,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    // 1. Open the store, build the router and bind the listener.
    let mut server_context = initialization::setup(config, config_path, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Accept clients until a shutdown signal arrives.
    connection_loop::run(server_context).await;

    Ok(())
}
