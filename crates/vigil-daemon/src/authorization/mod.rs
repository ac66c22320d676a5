//! Request-path authorization.
//!
//! The authorizer resolves a request's [`Attributes`] — who wants to do
//! what, to which resource, where — into an allow/deny decision over
//! the current set of roles and bindings. The decision is deterministic
//! in the attributes and the store snapshot; there is no caching.

pub mod rbac;

use async_trait::async_trait;
use thiserror::Error;
use vigil_core::Claims;

pub use rbac::RbacAuthorizer;

use crate::store::StoreError;

/// Errors surfaced while evaluating authorization.
#[derive(Debug, Clone, Error)]
pub enum AuthorizationError {
    /// The store failed while listing bindings or resolving roles.
    /// The HTTP layer maps this to 500.
    #[error("authorization store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthorizationError>;

/// The attributes of one request, as derived from its URL shape and
/// method plus the authenticated claims.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Requested verb: `get`, `list`, `create`, `update`, or `delete`.
    pub verb: String,

    /// API group of the requested resource.
    pub api_group: String,

    /// Requested resource type, e.g. `checks` or `users/password`.
    pub resource: String,

    /// Requested resource name; empty for list requests.
    pub resource_name: String,

    /// Namespace of the request; empty for cluster-scoped requests.
    pub namespace: String,

    /// The authenticated principal.
    pub user: Claims,
}

/// Decides whether a request is allowed.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Evaluates the attributes against current policy. `Ok(false)` is
    /// a deny; errors mean policy could not be evaluated.
    async fn authorize(&self, attrs: &Attributes) -> AuthzResult<bool>;
}
