//! Authorization middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::authorization::{Attributes, Authorizer};

/// Evaluates the request's derived [`Attributes`] against the
/// authorizer. Denies get 403; evaluation failures get 500. Requests
/// the attribute middleware did not mark (non-API paths) pass through.
pub async fn authorization(
    State(authorizer): State<Arc<dyn Authorizer>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(attrs) = req.extensions().get::<Attributes>() else {
        return next.run(req).await;
    };

    match authorizer.authorize(attrs).await {
        Ok(true) => next.run(req).await,
        Ok(false) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            error!(error = %e, "authorization evaluation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
