//! Authorization attribute derivation.
//!
//! Attributes are derived from the URL shape alone:
//!
//! ```text
//! /api/<group>/<version>/<resource>[/<id>[/<sub>]]
//! /api/<group>/<version>/namespaces/<ns>/<resource>[/<id>[/<sub>]]
//! ```
//!
//! and the method: `GET` is `list` without an id and `get` with one,
//! `POST` is `create`, `PUT` is `update`, `DELETE` is `delete`. A
//! subresource joins its parent as `<resource>/<sub>`, so
//! `PUT /api/core/v2/users/foo/password` derives the resource
//! `users/password` with resource name `foo`.

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use vigil_core::Claims;

use crate::authorization::Attributes;

/// Derives [`Attributes`] for API requests and stores them in request
/// extensions. API requests without authenticated [`Claims`] are
/// rejected with 401; non-API requests pass through untouched.
pub async fn attributes(mut req: Request, next: Next) -> Response {
    let Some(mut attrs) = derive_attributes(req.method(), req.uri().path()) else {
        return next.run(req).await;
    };

    let Some(claims) = req.extensions().get::<Claims>().cloned() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    attrs.user = claims;
    req.extensions_mut().insert(attrs);
    next.run(req).await
}

/// Derives authorization attributes from a method and path. `None` for
/// paths outside the API shape.
#[must_use]
pub fn derive_attributes(method: &Method, path: &str) -> Option<Attributes> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.first() != Some(&"api") || segments.len() < 4 {
        return None;
    }
    let api_group = segments[1];
    let rest = &segments[3..];

    // `/namespaces/<ns>/<resource>...` scopes the request; a shorter
    // `/namespaces[/<id>]` path addresses the namespace resource
    // itself, cluster-scoped.
    let (namespace, resource_segments) = if rest[0] == "namespaces" && rest.len() >= 3 {
        (rest[1], &rest[2..])
    } else {
        ("", rest)
    };

    let mut resource = resource_segments[0].to_string();
    let resource_name = resource_segments.get(1).copied().unwrap_or("");
    if let Some(sub) = resource_segments.get(2) {
        resource = format!("{resource}/{sub}");
    }

    let verb = match *method {
        Method::GET => {
            if resource_name.is_empty() {
                "list".to_string()
            } else {
                "get".to_string()
            }
        }
        Method::POST => "create".to_string(),
        Method::PUT => "update".to_string(),
        Method::DELETE => "delete".to_string(),
        ref other => other.as_str().to_ascii_lowercase(),
    };

    Some(Attributes {
        verb,
        api_group: api_group.to_string(),
        resource,
        resource_name: resource_name.to_string(),
        namespace: namespace.to_string(),
        user: Claims::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn derived(method: Method, path: &str) -> Attributes {
        derive_attributes(&method, path).expect("path should derive attributes")
    }

    #[test]
    fn cluster_scoped_resources() {
        let attrs = derived(Method::GET, "/api/core/v2/users");
        assert_eq!(attrs.verb, "list");
        assert_eq!(attrs.api_group, "core");
        assert_eq!(attrs.resource, "users");
        assert_eq!(attrs.resource_name, "");
        assert_eq!(attrs.namespace, "");

        let attrs = derived(Method::GET, "/api/core/v2/users/foo");
        assert_eq!(attrs.verb, "get");
        assert_eq!(attrs.resource_name, "foo");
    }

    #[test]
    fn namespaced_resources() {
        let attrs = derived(Method::GET, "/api/core/v2/namespaces/default/checks/check-cpu");
        assert_eq!(attrs.verb, "get");
        assert_eq!(attrs.resource, "checks");
        assert_eq!(attrs.resource_name, "check-cpu");
        assert_eq!(attrs.namespace, "default");

        let attrs = derived(Method::POST, "/api/core/v2/namespaces/acme/rolebindings");
        assert_eq!(attrs.verb, "create");
        assert_eq!(attrs.namespace, "acme");
        assert_eq!(attrs.resource, "rolebindings");
    }

    #[test]
    fn namespace_resource_is_cluster_scoped() {
        let attrs = derived(Method::GET, "/api/core/v2/namespaces");
        assert_eq!(attrs.verb, "list");
        assert_eq!(attrs.resource, "namespaces");
        assert_eq!(attrs.namespace, "");

        let attrs = derived(Method::GET, "/api/core/v2/namespaces/acme");
        assert_eq!(attrs.verb, "get");
        assert_eq!(attrs.resource, "namespaces");
        assert_eq!(attrs.resource_name, "acme");
        assert_eq!(attrs.namespace, "");
    }

    #[test]
    fn subresources_join_their_parent() {
        let attrs = derived(Method::PUT, "/api/core/v2/users/foo/password");
        assert_eq!(attrs.verb, "update");
        assert_eq!(attrs.resource, "users/password");
        assert_eq!(attrs.resource_name, "foo");

        let attrs = derived(
            Method::GET,
            "/api/core/v2/namespaces/default/events/entity-1/check-cpu",
        );
        assert_eq!(attrs.resource, "events/check-cpu");
        assert_eq!(attrs.resource_name, "entity-1");
        assert_eq!(attrs.namespace, "default");
    }

    #[test]
    fn verbs_follow_the_method() {
        assert_eq!(derived(Method::DELETE, "/api/core/v2/users/foo").verb, "delete");
        assert_eq!(derived(Method::POST, "/api/core/v2/users").verb, "create");
        assert_eq!(derived(Method::PATCH, "/api/core/v2/users/foo").verb, "patch");
    }

    #[test]
    fn non_api_paths_derive_nothing() {
        assert!(derive_attributes(&Method::GET, "/healthz").is_none());
        assert!(derive_attributes(&Method::GET, "/api/core/v2").is_none());
        assert!(derive_attributes(&Method::GET, "/metrics").is_none());
    }
}
