//! Namespace resource.

use serde::{Deserialize, Serialize};

use crate::meta::{validate_name, ValidationError};

/// A namespace partitions resources and agent sessions. Namespaces are
/// cluster-scoped and referenced by name everywhere else in the model.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
pub struct Namespace {
    /// Unique namespace name.
    #[prost(string, tag = "1")]
    pub name: String,
}

impl Namespace {
    /// Creates a namespace with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Validates the namespace name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidName`] when the name is empty
    /// or malformed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)
    }
}
