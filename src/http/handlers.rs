//! Endpoint handlers.
//!
//! By the time a handler runs, the body guard, the class rate limit and the
//! payload extractor have all accepted the request.

use axum::{extract::State, Json};
use constant_time_eq::constant_time_eq;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::extract::{GuardJson, ScreenedPrompt, ValidatedGeometry};
use crate::http::server::AppState;
use crate::security::error::{DefenseError, DefenseResult};
use crate::upstream::UpstreamService;

/// Vegetation and water indices the geospatial backend computes.
pub const SUPPORTED_INDICES: [&str; 4] = ["NDVI", "NDWI", "EVI", "SAVI"];

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn chat(
    State(state): State<AppState>,
    screened: ScreenedPrompt,
) -> DefenseResult<Json<Value>> {
    let ScreenedPrompt {
        request,
        assessment,
    } = screened;
    let inner = state.current();

    let reply = inner
        .upstream
        .post_json(
            UpstreamService::Generative,
            &json!({
                "prompt": request.prompt,
                "model": request.model,
                "context": request.context,
            }),
        )
        .await?;

    Ok(Json(json!({
        "reply": reply,
        "risk": {
            "flagged": assessment.is_flagged,
            "score": assessment.score,
            "severity": assessment.severity,
        },
    })))
}

/// Normalise the requested index, defaulting to NDVI.
pub fn resolve_index(requested: Option<&str>) -> DefenseResult<&'static str> {
    let Some(requested) = requested else {
        return Ok(SUPPORTED_INDICES[0]);
    };
    let upper = requested.trim().to_ascii_uppercase();
    SUPPORTED_INDICES
        .iter()
        .copied()
        .find(|index| *index == upper)
        .ok_or_else(|| {
            DefenseError::invalid_field(
                "index",
                format!("must be one of {}", SUPPORTED_INDICES.join(", ")),
            )
        })
}

pub async fn analysis(
    State(state): State<AppState>,
    validated: ValidatedGeometry,
) -> DefenseResult<Json<Value>> {
    let index = resolve_index(validated.request.index.as_deref())?;
    let inner = state.current();

    let result = inner
        .upstream
        .post_json(
            UpstreamService::Geospatial,
            &json!({
                "aoiGeoJSON": validated.request.aoi_geojson,
                "index": index,
            }),
        )
        .await?;

    Ok(Json(json!({
        "index": index,
        "geometryType": validated.kind,
        "result": result,
    })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

pub async fn auth_verify(
    State(state): State<AppState>,
    GuardJson(request): GuardJson<VerifyRequest>,
) -> DefenseResult<Json<Value>> {
    let inner = state.current();
    let presented = request.api_key.as_bytes();

    let matched = inner
        .config
        .auth
        .api_keys
        .iter()
        .any(|key| constant_time_eq(key.as_bytes(), presented));

    if !matched {
        return Err(DefenseError::authentication_required("Invalid API key"));
    }
    Ok(Json(json!({ "authenticated": true })))
}

pub async fn admin_stats(State(state): State<AppState>) -> Json<Value> {
    let inner = state.current();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "stats": inner.pipeline.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::error::ErrorKind;

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(None).unwrap(), "NDVI");
        assert_eq!(resolve_index(Some("evi")).unwrap(), "EVI");
        assert_eq!(resolve_index(Some(" savi ")).unwrap(), "SAVI");

        let err = resolve_index(Some("NBR")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.errors()[0].field, "index");
    }
}
