use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use constant_time_eq::constant_time_eq;

use crate::http::server::AppState;
use crate::security::error::DefenseError;

/// Bearer key check for `/admin/*`.
///
/// A missing or malformed header is unauthenticated; a well-formed but wrong
/// key is forbidden. Without a configured key every request is forbidden.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let inner = state.current();

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty());

    let Some(presented) = presented else {
        return DefenseError::authentication_required("Admin credentials required").into_response();
    };

    match inner.config.auth.admin_key.as_deref() {
        Some(expected) if constant_time_eq(expected.as_bytes(), presented.as_bytes()) => {
            next.run(request).await
        }
        _ => DefenseError::forbidden("Admin access denied").into_response(),
    }
}
