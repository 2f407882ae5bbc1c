// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use crate::core::handlers::HandlerSettings;
use crate::core::router::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT, RouterSettings,
};
use crate::core::store::StoreBackend;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Where connection records are kept.
#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// The JSON file or SQLite database path. Ignored by the memory backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/connections.json")
}

/// Sizing of the event fan-out.
#[derive(Deserialize, Debug, Clone)]
pub struct EventsConfig {
    /// Events buffered per observer before a slow observer starts losing them.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

/// Default deadlines applied when a request or connection config sets none.
#[derive(Deserialize, Debug, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect: Duration,
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation: Duration,
    #[serde(default = "default_disconnect_timeout", with = "humantime_serde")]
    pub disconnect: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            operation: default_operation_timeout(),
            disconnect: default_disconnect_timeout(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}
fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}
fn default_disconnect_timeout() -> Duration {
    DEFAULT_DISCONNECT_TIMEOUT
}

/// Paths of the external tools some handlers drive. Unset paths are looked
/// up on `PATH` when the handler connects.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub kubectl: Option<PathBuf>,
    #[serde(default)]
    pub grpcurl: Option<PathBuf>,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

/// The main configuration struct for the server.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub store: StoreConfig,
    pub events: EventsConfig,
    pub timeouts: TimeoutsConfig,
    pub tools: ToolsConfig,
    pub metrics: MetricsConfig,
}

/// The file as written on disk, before validation.
#[derive(Deserialize, Debug)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    events: EventsConfig,
    #[serde(default)]
    timeouts: TimeoutsConfig,
    #[serde(default)]
    tools: ToolsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7878
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            store: StoreConfig::default(),
            events: EventsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            tools: ToolsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))?;
        info!("Loaded configuration from '{}'", path);
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            store: raw.store,
            events: raw.events,
            timeouts: raw.timeouts,
            tools: raw.tools,
            metrics: raw.metrics,
        };
        config.validate()?;
        Ok(config)
    }

    /// The knobs handed to every protocol handler.
    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            connect_timeout: self.timeouts.connect,
            kubectl_path: self.tools.kubectl.clone(),
            grpcurl_path: self.tools.grpcurl.clone(),
        }
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            connect_timeout: self.timeouts.connect,
            operation_timeout: self.timeouts.operation,
            disconnect_timeout: self.timeouts.disconnect,
        }
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.events.channel_capacity == 0 {
            return Err(anyhow!("events.channel_capacity cannot be 0"));
        }
        if self.events.channel_capacity < 64 {
            warn!(
                "low events.channel_capacity: {}. Slow observers will drop events.",
                self.events.channel_capacity
            );
        }
        for (name, value) in [
            ("connect", self.timeouts.connect),
            ("operation", self.timeouts.operation),
            ("disconnect", self.timeouts.disconnect),
        ] {
            if value.is_zero() {
                return Err(anyhow!("timeouts.{name} cannot be 0"));
            }
        }
        if self.store.backend != StoreBackend::Memory
            && self.store.path.as_os_str().is_empty()
        {
            return Err(anyhow!("store.path cannot be empty"));
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
