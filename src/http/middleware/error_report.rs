//! Reporting of rejections produced anywhere inside the chain.
//!
//! Components return `DefenseError`, whose response carries a
//! [`ReportedError`] extension. This layer sees every such response once,
//! records it, and in development mode re-renders the body with details.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::http::request::request_id;
use crate::http::server::AppState;
use crate::security::audit::RequestOrigin;
use crate::security::error::ReportedError;

pub async fn report_errors(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = RequestOrigin::from_request(&request);
    let id = request_id(request.headers()).map(str::to_owned);

    let mut response = next.run(request).await;
    let Some(ReportedError(err)) = response.extensions_mut().remove::<ReportedError>() else {
        return response;
    };

    let current = state.current();
    tracing::debug!(request_id = ?id, code = err.code(), "Reporting rejection");
    current.pipeline.report(&origin, &err);

    if !current.pipeline.environment().is_development() {
        return response;
    }

    let body = match serde_json::to_vec(&current.pipeline.render(&err)) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to render development error body");
            return response;
        }
    };
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(body))
}
