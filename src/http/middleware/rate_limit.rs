//! Per endpoint class rate limiting.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::server::AppState;
use crate::security::audit::RequestOrigin;
use crate::security::rate_limit::EndpointClass;

/// State for one class' rate limit layer.
#[derive(Clone)]
pub struct ClassState {
    pub app: AppState,
    pub class: EndpointClass,
}

/// Admit the request against its class window. Successful responses give the
/// slot back on classes that skip successful requests.
pub async fn enforce_rate_limit(
    State(state): State<ClassState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let current = state.app.current();
    let origin = RequestOrigin::from_request(&request);

    let admission = match current.pipeline.admit(&origin, state.class) {
        Ok(admission) => admission,
        Err(err) => return err.into_response(),
    };

    let response = next.run(request).await;
    if response.status().is_success() {
        current.pipeline.refund(&origin, state.class, &admission);
    }
    response
}
