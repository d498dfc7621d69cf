//! Request extractors that run the payload validators.
//!
//! Handlers never see an unscreened prompt or an unvalidated geometry: the
//! extractors below reject the request first.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{header, StatusCode},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::http::server::AppState;
use crate::security::audit::RequestOrigin;
use crate::security::error::{DefenseError, FieldError};
use crate::security::geometry::{GeoPayload, GeometryKind};
use crate::security::injection::RiskAssessment;

/// JSON body whose decoding failures are reported as defense errors.
#[derive(Debug, Clone)]
pub struct GuardJson<T>(pub T);

impl<T> FromRequest<AppState> for GuardJson<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = DefenseError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(GuardJson(value)),
            Err(rejection) => Err(map_rejection(rejection, content_type.as_deref(), state)),
        }
    }
}

fn map_rejection(rejection: JsonRejection, content_type: Option<&str>, state: &AppState) -> DefenseError {
    match rejection.status() {
        StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            return DefenseError::unsupported_media_type(content_type);
        }
        StatusCode::PAYLOAD_TOO_LARGE => {
            return DefenseError::too_large(state.current().pipeline.max_body_bytes());
        }
        _ => {}
    }

    // serde's text names Rust types and positions; clients get a fixed message
    let detail = rejection.body_text();
    let field_error = match rejection {
        JsonRejection::JsonSyntaxError(_) => FieldError::new("body", "must be valid JSON"),
        JsonRejection::JsonDataError(_) => match missing_field(&detail) {
            Some(field) => FieldError::new(field, "is required"),
            None => FieldError::new("body", "does not match the expected shape"),
        },
        _ => FieldError::new("body", "could not be read"),
    };
    DefenseError::validation("Request validation failed", vec![field_error]).with_internal(detail)
}

/// Field name from serde's "missing field `name`" message.
fn missing_field(detail: &str) -> Option<&str> {
    let rest = detail.split("missing field `").nth(1)?;
    rest.split('`').next().filter(|name| !name.is_empty())
}

/// `POST /api/chat` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

/// A chat request whose prompt passed the injection detector.
#[derive(Debug, Clone)]
pub struct ScreenedPrompt {
    pub request: ChatRequest,
    pub assessment: RiskAssessment,
}

impl FromRequest<AppState> for ScreenedPrompt {
    type Rejection = DefenseError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let origin = RequestOrigin::from_request(&req);
        let GuardJson(request) = GuardJson::<ChatRequest>::from_request(req, state).await?;

        if request.prompt.trim().is_empty() {
            return Err(DefenseError::invalid_field("prompt", "must not be empty"));
        }
        if matches!(&request.context, Some(context) if !context.is_object()) {
            return Err(DefenseError::invalid_field("context", "must be an object"));
        }

        let assessment = state.current().pipeline.screen_prompt(&origin, &request.prompt)?;
        Ok(Self {
            request,
            assessment,
        })
    }
}

/// `POST /api/analysis` body.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRequest {
    #[serde(rename = "aoiGeoJSON")]
    pub aoi_geojson: GeoPayload,
    #[serde(default)]
    pub index: Option<String>,
}

/// An analysis request whose area of interest passed geometry validation.
#[derive(Debug, Clone)]
pub struct ValidatedGeometry {
    pub request: AnalysisRequest,
    pub kind: GeometryKind,
}

impl FromRequest<AppState> for ValidatedGeometry {
    type Rejection = DefenseError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let origin = RequestOrigin::from_request(&req);
        let GuardJson(request) = GuardJson::<AnalysisRequest>::from_request(req, state).await?;

        let kind = state
            .current()
            .pipeline
            .validate_geometry(&origin, &request.aoi_geojson)?;
        Ok(Self { request, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_name() {
        let detail = "Failed to deserialize the JSON body into the target type: \
                      missing field `prompt` at line 1 column 13";
        assert_eq!(missing_field(detail), Some("prompt"));
        assert_eq!(missing_field("invalid type: integer `7`, expected a string"), None);
    }
}
