//! Authorization middleware chain.
//!
//! Three middlewares run in order on API requests:
//!
//! 1. [`namespace`]: extracts the namespace path segment into request
//!    extensions.
//! 2. [`attributes`]: derives authorization
//!    [`Attributes`](crate::authorization::Attributes) from the URL
//!    shape, the method, and the authenticated claims (401 when claims
//!    are missing).
//! 3. [`authorization`]: evaluates the attributes against the
//!    [`Authorizer`](crate::authorization::Authorizer) and
//!    short-circuits with 403 on deny, 500 on evaluation failure.
//!
//! Requests outside the `/api/` shape pass through untouched; they are
//! guarded by other chains.

pub mod attributes;
pub mod authorization;
pub mod namespace;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;

use crate::authorization::Authorizer;

pub use attributes::derive_attributes;

/// Namespace of the request path, injected into request extensions by
/// the [`namespace`] middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceParam(pub String);

/// Applies the authorization chain to a router, in order: namespace,
/// attribute derivation, authorization.
#[must_use]
pub fn apply_authorization(router: Router, authorizer: Arc<dyn Authorizer>) -> Router {
    // Layers run outermost-last-added, so the chain is applied in
    // reverse of its request-side order.
    router
        .layer(from_fn_with_state(authorizer, authorization::authorization))
        .layer(from_fn(attributes::attributes))
        .layer(from_fn(namespace::namespace))
}
