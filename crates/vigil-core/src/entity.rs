//! Monitored entities.
//!
//! An entity represents something the platform monitors: an agent host,
//! or a proxy entity materialized on behalf of a check result that names
//! one. Every entity seen downstream of a session carries its implicit
//! `entity:<name>` subscription, which doubles as the per-agent dispatch
//! topic.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, ValidationError};

/// Entity class for entities backed by a connected agent.
pub const CLASS_AGENT: &str = "agent";

/// Entity class for entities materialized from a check's proxy entity
/// name.
pub const CLASS_PROXY: &str = "proxy";

/// Prefix of the implicit per-entity subscription.
const ENTITY_SUBSCRIPTION_PREFIX: &str = "entity:";

/// Returns the implicit subscription name for an entity.
#[must_use]
pub fn entity_subscription(entity_name: &str) -> String {
    format!("{ENTITY_SUBSCRIPTION_PREFIX}{entity_name}")
}

/// Appends the implicit `entity:<name>` subscription unless it is
/// already present. The incoming order is preserved.
#[must_use]
pub fn add_entity_subscription(entity_name: &str, mut subscriptions: Vec<String>) -> Vec<String> {
    let implicit = entity_subscription(entity_name);
    if !subscriptions.iter().any(|s| *s == implicit) {
        subscriptions.push(implicit);
    }
    subscriptions
}

/// Host information reported by an agent for its entity.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
pub struct System {
    /// Hostname as reported by the agent.
    #[prost(string, tag = "1")]
    pub hostname: String,

    /// Operating system, e.g. `linux`.
    #[prost(string, tag = "2")]
    pub os: String,

    /// Platform, e.g. `ubuntu`.
    #[prost(string, tag = "3")]
    pub platform: String,

    /// CPU architecture, e.g. `amd64`.
    #[prost(string, tag = "4")]
    pub arch: String,
}

/// A monitored entity.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name and namespace.
    #[prost(message, required, tag = "1")]
    pub metadata: ObjectMeta,

    /// Entity class: [`CLASS_AGENT`] for connected agents,
    /// [`CLASS_PROXY`] for materialized proxy entities.
    #[prost(string, tag = "2")]
    pub entity_class: String,

    /// Host information; empty for proxy entities.
    #[prost(message, required, tag = "3")]
    pub system: System,

    /// Subscriptions the entity participates in. Always includes the
    /// implicit `entity:<name>` subscription once ingested.
    #[prost(string, repeated, tag = "4")]
    pub subscriptions: Vec<String>,

    /// Unix timestamp of the last keepalive seen for this entity.
    #[prost(int64, tag = "5")]
    pub last_seen: i64,

    /// User the agent authenticated as.
    #[prost(string, tag = "6")]
    pub user: String,
}

impl Entity {
    /// Validates the entity metadata. Entities are namespaced.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the name is malformed or the
    /// namespace is missing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.metadata.validate(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_subscription_is_appended_once() {
        let subs = add_entity_subscription("srv-1", vec!["linux".into()]);
        assert_eq!(subs, vec!["linux".to_string(), "entity:srv-1".to_string()]);

        let subs = add_entity_subscription("srv-1", subs);
        assert_eq!(subs, vec!["linux".to_string(), "entity:srv-1".to_string()]);
    }

    #[test]
    fn entity_subscription_appended_to_empty_set() {
        let subs = add_entity_subscription("srv-1", Vec::new());
        assert_eq!(subs, vec!["entity:srv-1".to_string()]);
    }

    #[test]
    fn validate_requires_namespace() {
        let entity = Entity {
            metadata: ObjectMeta::new("srv-1", ""),
            ..Entity::default()
        };
        assert!(entity.validate().is_err());

        let entity = Entity {
            metadata: ObjectMeta::new("srv-1", "default"),
            ..Entity::default()
        };
        assert!(entity.validate().is_ok());
    }
}
