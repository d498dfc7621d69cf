use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;

use crate::http::server::AppState;
use crate::security::error::DefenseError;

/// Bound the whole request by the configured time budget.
pub async fn request_timeout(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let budget = Duration::from_secs(state.current().config.listener.request_timeout_secs);

    match tokio::time::timeout(budget, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(budget_secs = budget.as_secs(), "Request exceeded time budget");
            DefenseError::timed_out("request").into_response()
        }
    }
}
