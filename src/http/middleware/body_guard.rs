//! Size and media type checks that run before any body is read.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::server::AppState;
use crate::security::limits::{check_content_type, check_declared_length};

pub async fn body_guard(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let max_bytes = state.current().pipeline.max_body_bytes();

    let checked = check_declared_length(request.headers(), max_bytes)
        .and_then(|()| check_content_type(request.method(), request.headers()));

    match checked {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}
