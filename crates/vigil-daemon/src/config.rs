//! Backend configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file did not parse.
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        /// Path of the file.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Backend daemon configuration, loaded from a TOML file. Every field
/// has a default so a missing file or empty table is a working
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Address the HTTP API (health, metrics) listens on.
    pub api_listen: SocketAddr,

    /// Address the agent listener accepts connections on.
    pub agent_listen: SocketAddr,

    /// TTL in seconds of subscription-ring membership leases. Agents
    /// refresh through their keepalives; a keepalive interval at or
    /// below a third of this keeps members alive.
    pub ring_lease_ttl_secs: u64,

    /// Default tracing filter, overridable with `RUST_LOG`.
    pub log_filter: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_listen: "127.0.0.1:8080".parse().expect("default api address"),
            agent_listen: "127.0.0.1:8081".parse().expect("default agent address"),
            ring_lease_ttl_secs: 120,
            log_filter: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the file cannot be read or does
    /// not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Ring membership lease TTL as a duration.
    #[must_use]
    pub fn ring_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.ring_lease_ttl_secs)
    }
}
