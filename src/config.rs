//! Configuration for chat-socket

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::SocketConfig;
use crate::error::SocketError;
use crate::monitor::MonitorConfig;

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat-socket")
        .join("config.toml")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Candidate chat hosts, tried round-robin
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Host used when `hosts` is empty
    #[serde(default = "default_host")]
    pub default_host: String,

    /// `wss` or `ws`
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// WebSocket endpoint path
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Server idle timeout; keep-alives are sent at a third of it
    #[serde(default = "default_keep_alive_timeout")]
    pub keep_alive_timeout_secs: u64,

    /// Timeout for a single awaited request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Hard cap on one handshake at the transport level
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound of the reconnect backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_true")]
    pub backoff_jitter: bool,

    /// Re-check interval while logged out
    #[serde(default = "default_login_poll_interval")]
    pub login_poll_interval_ms: u64,

    #[serde(default = "default_keep_alive_path")]
    pub keep_alive_path: String,

    /// Pushed requests held while nobody reads them; further pushes are dropped
    #[serde(default = "default_incoming_queue_capacity")]
    pub incoming_queue_capacity: usize,

    /// Reachability probe interval
    #[serde(default = "default_probe_interval")]
    pub network_probe_interval_secs: u64,

    /// `host:port` addresses probed for reachability (empty = assume online)
    #[serde(default)]
    pub network_probe_addrs: Vec<String>,
}

fn default_host() -> String {
    "chat.example.org".to_string()
}

fn default_scheme() -> String {
    "wss".to_string()
}

fn default_websocket_path() -> String {
    "/v1/websocket/".to_string()
}

fn default_user_agent() -> String {
    format!("chat-socket/{}", env!("CARGO_PKG_VERSION"))
}

fn default_keep_alive_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_max_backoff() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_login_poll_interval() -> u64 {
    1000
}

fn default_keep_alive_path() -> String {
    "/v1/keepalive".to_string()
}

fn default_incoming_queue_capacity() -> usize {
    1024
}

fn default_probe_interval() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            default_host: default_host(),
            scheme: default_scheme(),
            websocket_path: default_websocket_path(),
            user_agent: default_user_agent(),
            keep_alive_timeout_secs: 30,
            request_timeout_secs: 10,
            connect_timeout_secs: 60,
            max_backoff_ms: 5000,
            backoff_jitter: true,
            login_poll_interval_ms: 1000,
            keep_alive_path: default_keep_alive_path(),
            incoming_queue_capacity: default_incoming_queue_capacity(),
            network_probe_interval_secs: 5,
            network_probe_addrs: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SocketError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| SocketError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file, or defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, SocketError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SocketError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SocketError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SocketError> {
        if self.scheme != "wss" && self.scheme != "ws" {
            return Err(SocketError::Config(format!(
                "Unsupported scheme: {}",
                self.scheme
            )));
        }
        if self.keep_alive_timeout_secs < 3 {
            return Err(SocketError::Config(
                "keep_alive_timeout_secs must be at least 3".into(),
            ));
        }
        if self.incoming_queue_capacity == 0 {
            return Err(SocketError::Config(
                "incoming_queue_capacity must be at least 1".into(),
            ));
        }
        if self.hosts.iter().all(|h| h.trim().is_empty()) && self.default_host.trim().is_empty() {
            return Err(SocketError::Config("No chat host configured".into()));
        }
        Ok(())
    }

    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            keep_alive_path: self.keep_alive_path.clone(),
            incoming_queue_capacity: self.incoming_queue_capacity,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            keep_alive_timeout: Duration::from_secs(self.keep_alive_timeout_secs),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_jitter: self.backoff_jitter,
            login_poll_interval: Duration::from_millis(self.login_poll_interval_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn network_probe_interval(&self) -> Duration {
        Duration::from_secs(self.network_probe_interval_secs)
    }
}
