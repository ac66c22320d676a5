//! Namespace extraction middleware.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::NamespaceParam;

/// Injects the namespace named by the request path into request
/// extensions, for handlers downstream of the chain. Requests without a
/// namespace segment pass through untouched.
pub async fn namespace(mut req: Request, next: Next) -> Response {
    if let Some(ns) = namespace_from_path(req.uri().path()).map(str::to_string) {
        req.extensions_mut().insert(NamespaceParam(ns));
    }
    next.run(req).await
}

/// Extracts `<ns>` from `/api/<group>/<version>/namespaces/<ns>/...`
/// paths. A bare `/namespaces` or `/namespaces/<id>` names the
/// namespace *resource*, not a request namespace, and yields `None`.
fn namespace_from_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    if segments.next() != Some("api") {
        return None;
    }
    let _group = segments.next()?;
    let _version = segments.next()?;
    if segments.next() != Some("namespaces") {
        return None;
    }
    let ns = segments.next()?;
    // Only namespaced-resource paths carry a request namespace.
    segments.next()?;
    Some(ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_resource_paths_yield_the_namespace() {
        assert_eq!(
            namespace_from_path("/api/core/v2/namespaces/default/checks"),
            Some("default")
        );
        assert_eq!(
            namespace_from_path("/api/core/v2/namespaces/acme/checks/check-cpu"),
            Some("acme")
        );
    }

    #[test]
    fn namespace_resource_paths_yield_nothing() {
        assert_eq!(namespace_from_path("/api/core/v2/namespaces"), None);
        assert_eq!(namespace_from_path("/api/core/v2/namespaces/acme"), None);
    }

    #[test]
    fn non_api_paths_yield_nothing() {
        assert_eq!(namespace_from_path("/healthz"), None);
        assert_eq!(namespace_from_path("/namespaces/acme/checks"), None);
    }
}
