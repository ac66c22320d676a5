//! Check configuration and check requests.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// Name of the builtin keepalive check.
pub const KEEPALIVE_CHECK_NAME: &str = "keepalive";

/// A check: a named probe executed by agents, whose execution result
/// comes back as an event. The same type carries both the configured
/// shape (command, interval, subscriptions) and the executed shape
/// (status, output, timings) inside events.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Check {
    /// Check name and namespace.
    #[prost(message, required, tag = "1")]
    pub metadata: ObjectMeta,

    /// Command the agent executes.
    #[prost(string, tag = "2")]
    pub command: String,

    /// Execution interval in seconds.
    #[prost(uint32, tag = "3")]
    pub interval: u32,

    /// Subscriptions the check is dispatched to.
    #[prost(string, repeated, tag = "4")]
    pub subscriptions: Vec<String>,

    /// When set, results are attributed to a proxy entity of this name
    /// instead of the reporting agent's entity.
    #[prost(string, tag = "5")]
    pub proxy_entity_name: String,

    /// Exit status of the executed command.
    #[prost(uint32, tag = "6")]
    pub status: u32,

    /// Captured output of the executed command.
    #[prost(string, tag = "7")]
    pub output: String,

    /// Unix timestamp at which the request was issued by the backend.
    #[prost(int64, tag = "8")]
    pub issued: i64,

    /// Unix timestamp at which the agent executed the check.
    #[prost(int64, tag = "9")]
    pub executed: i64,
}

impl Check {
    /// True when this check is the builtin keepalive.
    #[must_use]
    pub fn is_keepalive(&self) -> bool {
        self.metadata.name == KEEPALIVE_CHECK_NAME
    }
}

/// A runtime asset the agent fetches before executing a check.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Asset {
    /// Asset name and namespace.
    #[prost(message, required, tag = "1")]
    pub metadata: ObjectMeta,

    /// URL the asset archive is fetched from.
    #[prost(string, tag = "2")]
    pub url: String,

    /// SHA-512 digest of the asset archive.
    #[prost(string, tag = "3")]
    pub sha512: String,
}

/// A hook the agent runs in response to a check result.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct HookConfig {
    /// Hook name and namespace.
    #[prost(message, required, tag = "1")]
    pub metadata: ObjectMeta,

    /// Command the hook executes.
    #[prost(string, tag = "2")]
    pub command: String,

    /// Execution timeout in seconds.
    #[prost(uint32, tag = "3")]
    pub timeout: u32,
}

/// The payload dispatched to exactly one agent per scheduled tick: the
/// check configuration plus the assets and hooks its execution needs.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Configuration of the check to execute.
    #[prost(message, optional, tag = "1")]
    pub config: Option<Check>,

    /// Runtime assets required by the check.
    #[prost(message, repeated, tag = "2")]
    pub assets: Vec<Asset>,

    /// Hooks attached to the check.
    #[prost(message, repeated, tag = "3")]
    pub hooks: Vec<HookConfig>,

    /// Unix timestamp at which the backend issued the request.
    #[prost(int64, tag = "4")]
    pub issued: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_check_detection() {
        let mut check = Check {
            metadata: ObjectMeta::new(KEEPALIVE_CHECK_NAME, "default"),
            ..Check::default()
        };
        assert!(check.is_keepalive());

        check.metadata.name = "check-cpu".into();
        assert!(!check.is_keepalive());
    }
}
