//! Configuration management for netwatchd.
//!
//! Uses figment to merge configuration from multiple sources:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables (`NETWATCHD_SERVER__PORT=...`)
//! 4. Command-line arguments

use crate::cli::Cli;
use crate::error::ServerError;
use crate::watcher::DEFAULT_SUBSCRIBER_BACKLOG;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use netwatch_protocol::{DEFAULT_HOST, DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Watch target configuration
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Listener and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long shutdown waits for subscribers before closing them forcibly
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Largest inbound line accepted from a subscriber
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// How the target file is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// OS notifications (inotify, FSEvents, ...)
    Native,
    /// mtime polling, for filesystems without native notifications
    Poll,
}

/// Watch target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// File to watch
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_backend")]
    pub backend: WatchBackend,

    /// Polling interval in milliseconds (poll backend only)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Coalesce bursts of native events within this window; 0 disables
    #[serde(default)]
    pub debounce_ms: u64,

    /// Undelivered events a subscriber may queue before it is disconnected
    #[serde(default = "default_subscriber_backlog")]
    pub subscriber_backlog: usize,
}

fn default_host() -> IpAddr {
    DEFAULT_HOST
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_backend() -> WatchBackend {
    WatchBackend::Native
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_subscriber_backlog() -> usize {
    DEFAULT_SUBSCRIBER_BACKLOG
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            path: None,
            backend: default_backend(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: 0,
            subscriber_backlog: default_subscriber_backlog(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Add config file if provided
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        } else {
            // Try default config locations
            let default_paths = [
                PathBuf::from("/etc/netwatch/config.toml"),
                dirs::config_dir()
                    .unwrap_or_default()
                    .join("netwatch/config.toml"),
            ];

            for path in &default_paths {
                if path.exists() {
                    figment = figment.merge(Toml::file(path));
                    break;
                }
            }
        }

        // Environment variables (NETWATCHD_ prefix, `__` between sections)
        figment = figment.merge(Env::prefixed("NETWATCHD_").split("__"));

        figment.extract()
    }

    /// Apply command-line overrides
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(path) = &cli.path {
            self.watch.path = Some(path.clone());
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(host) = cli.host {
            self.server.host = host;
        }
        if let Some(level) = &cli.log_level {
            self.server.log_level = level.clone();
        }
        self
    }

    /// The file to watch, or a configuration error if none was given.
    pub fn watch_path(&self) -> Result<&PathBuf, ServerError> {
        self.watch.path.as_ref().ok_or_else(|| {
            ServerError::Config(
                "no file specified: pass a path argument or set watch.path".to_string(),
            )
        })
    }
}
