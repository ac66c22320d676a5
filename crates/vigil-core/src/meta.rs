//! Object metadata shared by every namespaced resource.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters permitted in resource names.
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+$").expect("name pattern is a valid regex")
});

/// Validation failure for a resource or one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The resource name is empty or contains characters outside
    /// `[A-Za-z0-9._-]`.
    #[error("name {0:?} is invalid: must be non-empty and match [A-Za-z0-9._-]+")]
    InvalidName(String),

    /// A namespaced resource is missing its namespace.
    #[error("namespace must be set")]
    MissingNamespace,

    /// An event is missing its entity.
    #[error("event must contain an entity")]
    MissingEntity,

    /// An event carries a zero or negative timestamp.
    #[error("timestamp must be greater than zero")]
    InvalidTimestamp,

    /// An event carries neither a check nor metrics.
    #[error("event must contain a check or metrics")]
    MissingCheckAndMetrics,
}

/// Validates a resource name against the allowed character set.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidName`] when the name is empty or
/// contains a character outside `[A-Za-z0-9._-]`.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

/// Metadata carried by every resource: a name, the namespace the
/// resource lives in (empty for cluster-scoped resources), and
/// free-form labels and annotations.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Resource name, unique within its namespace.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Namespace the resource belongs to; empty for cluster-scoped
    /// resources.
    #[prost(string, tag = "2")]
    pub namespace: String,

    /// Key/value pairs used for selection.
    #[prost(map = "string, string", tag = "3")]
    pub labels: HashMap<String, String>,

    /// Key/value pairs carrying opaque, non-identifying data.
    #[prost(map = "string, string", tag = "4")]
    pub annotations: HashMap<String, String>,
}

impl ObjectMeta {
    /// Creates metadata with the given name and namespace and no
    /// labels or annotations.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
        }
    }

    /// Validates the name, and the namespace when `namespaced` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidName`] for a malformed name and
    /// [`ValidationError::MissingNamespace`] for a namespaced resource
    /// without a namespace.
    pub fn validate(&self, namespaced: bool) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if namespaced && self.namespace.is_empty() {
            return Err(ValidationError::MissingNamespace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["srv-1", "check.cpu", "a_b", "0", "entity-01.example.com"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_invalid_names() {
        for name in ["", "has space", "slash/name", "entity:web", "é"] {
            assert!(validate_name(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn namespaced_resources_require_a_namespace() {
        let meta = ObjectMeta::new("check-cpu", "");
        assert_eq!(
            meta.validate(true),
            Err(ValidationError::MissingNamespace)
        );
        assert!(meta.validate(false).is_ok());
    }
}
