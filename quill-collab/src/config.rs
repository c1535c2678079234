//! Relay server configuration.
//!
//! Defaults suit local development. [`ServerConfig::from_env`] overlays
//! `QUILL_*` environment variables (after loading `.env` if present).

use std::time::Duration;

use serde::Deserialize;

use crate::error::RelayError;

/// Prefix of every configuration variable, e.g. `QUILL_BIND_ADDR`.
pub const ENV_PREFIX: &str = "QUILL_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum participants per document session
    #[serde(default = "default_max_peers_per_room")]
    pub max_peers_per_room: usize,
    /// Outbound queue length per connection
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Length of the hub's command queue. Readers wait when it is full.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Ping interval for the heartbeat. `None` disables it.
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    /// Silence tolerated after a ping before the connection is dropped
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Default log filter, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, RelayError> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_peers_per_room: default_max_peers_per_room(),
            broadcast_capacity: default_broadcast_capacity(),
            command_capacity: default_command_capacity(),
            heartbeat_interval_secs: None,
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_max_peers_per_room() -> usize {
    100
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_command_capacity() -> usize {
    1024
}

fn default_heartbeat_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}
