//! Error taxonomy shared by every defense component.
//!
//! A closed set of [`ErrorKind`]s, each with a fixed HTTP status and default
//! severity. Components raise [`DefenseError`] exclusively; the HTTP layer
//! renders it with an exhaustive match so no kind can be left unhandled.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Environment;
use crate::security::masking::FieldMasker;

/// Severity attached to a rejection for triage and log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

/// Every way a request can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ValidationFailed,
    RequestTooLarge,
    UnsupportedMediaType,
    RateLimitExceeded,
    AuthenticationRequired,
    AuthorizationInsufficient,
    ExternalServiceFailure,
    OperationTimedOut,
    InternalError,
}

impl ErrorKind {
    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AuthorizationInsufficient => StatusCode::FORBIDDEN,
            Self::ExternalServiceFailure => StatusCode::BAD_GATEWAY,
            Self::OperationTimedOut => StatusCode::REQUEST_TIMEOUT,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::ValidationFailed
            | Self::RequestTooLarge
            | Self::UnsupportedMediaType
            | Self::RateLimitExceeded
            | Self::OperationTimedOut => ErrorSeverity::Low,
            Self::AuthenticationRequired
            | Self::AuthorizationInsufficient
            | Self::ExternalServiceFailure
            | Self::InternalError => ErrorSeverity::Medium,
        }
    }

    /// Stable code; rate limit codes carry a class suffix on top of this.
    pub const fn code(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::RequestTooLarge => "REQUEST_TOO_LARGE",
            Self::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            Self::RateLimitExceeded => "RATE_LIMIT",
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::AuthorizationInsufficient => "AUTHORIZATION_INSUFFICIENT",
            Self::ExternalServiceFailure => "EXTERNAL_SERVICE_FAILURE",
            Self::OperationTimedOut => "OPERATION_TIMED_OUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// One field-level validation problem, rendered in the `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The single error shape produced by the defense layer.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct DefenseError {
    kind: ErrorKind,
    message: String,
    code: String,
    severity: ErrorSeverity,
    details: Option<Value>,
    errors: Vec<FieldError>,
    retry_after: Option<Duration>,
    internal: Option<String>,
    timestamp: DateTime<Utc>,
}

impl DefenseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: kind.code().to_string(),
            severity: kind.default_severity(),
            details: None,
            errors: Vec::new(),
            retry_after: None,
            internal: None,
            timestamp: Utc::now(),
        }
    }

    pub fn validation(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        let mut err = Self::new(ErrorKind::ValidationFailed, message);
        err.errors = errors;
        err
    }

    /// Validation failure on a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field_error = FieldError::new(field, message);
        Self::validation("Request validation failed", vec![field_error])
    }

    pub fn too_large(limit: usize) -> Self {
        Self::new(
            ErrorKind::RequestTooLarge,
            format!("Request body exceeds the {limit} byte limit"),
        )
        .with_details(json!({ "limit": limit }))
    }

    pub fn unsupported_media_type(found: Option<&str>) -> Self {
        Self::new(
            ErrorKind::UnsupportedMediaType,
            "Request body must be application/json",
        )
        .with_details(json!({ "contentType": found }))
    }

    /// Rate limit rejection; `class_code` is appended to the `RATE_LIMIT_` code.
    pub fn rate_limited(class_code: &str, retry_after: Duration) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimitExceeded,
            "Too many requests, please retry later",
        );
        err.code = format!("{}_{}", ErrorKind::RateLimitExceeded.code(), class_code);
        err.retry_after = Some(retry_after);
        err
    }

    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationRequired, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthorizationInsufficient, message)
    }

    pub fn external(service: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalServiceFailure, message)
            .with_details(json!({ "service": service, "reason": reason }))
    }

    pub fn timed_out(operation: &str) -> Self {
        Self::new(
            ErrorKind::OperationTimedOut,
            format!("The {operation} did not complete in time"),
        )
        .with_details(json!({ "operation": operation }))
    }

    /// Internal failure; the raw cause is kept out of client responses.
    pub fn internal(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, "Internal server error").with_internal(cause)
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal = Some(internal.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whole seconds until retry, rounded up so clients never retry early.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }

    /// Client-facing JSON body.
    ///
    /// Development mode adds masked `details` and the internal cause.
    pub fn render(&self, environment: Environment, masker: &FieldMasker) -> Value {
        let mut body = Map::new();
        body.insert("error".into(), Value::Bool(true));
        body.insert("code".into(), Value::String(self.code.clone()));
        body.insert("message".into(), Value::String(self.message.clone()));
        body.insert(
            "timestamp".into(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        match self.kind {
            ErrorKind::ValidationFailed => {
                body.insert("errors".into(), json!(self.errors));
            }
            ErrorKind::RateLimitExceeded => {
                if let Some(secs) = self.retry_after_secs() {
                    body.insert("retryAfter".into(), json!(secs));
                }
            }
            ErrorKind::RequestTooLarge
            | ErrorKind::UnsupportedMediaType
            | ErrorKind::AuthenticationRequired
            | ErrorKind::AuthorizationInsufficient
            | ErrorKind::ExternalServiceFailure
            | ErrorKind::OperationTimedOut
            | ErrorKind::InternalError => {}
        }

        if environment.is_development() {
            if let Some(details) = &self.details {
                body.insert("details".into(), masker.mask_json(details));
            }
            if let Some(internal) = &self.internal {
                body.insert("debug".into(), Value::String(internal.clone()));
            }
        }

        Value::Object(body)
    }

    /// Security log payload: unredacted apart from sensitive-field masking.
    pub fn log_detail(&self, masker: &FieldMasker) -> Value {
        json!({
            "code": self.code,
            "status": self.status().as_u16(),
            "message": self.message,
            "errors": self.errors,
            "retryAfter": self.retry_after_secs(),
            "details": self.details.as_ref().map(|d| masker.mask_json(d)),
            "internal": self.internal,
        })
    }
}

/// Marker attached to error responses so outer middleware can log them and
/// re-render the body for development mode.
#[derive(Debug, Clone)]
pub struct ReportedError(pub Arc<DefenseError>);

impl IntoResponse for DefenseError {
    fn into_response(self) -> Response {
        let body = self.render(Environment::Production, &FieldMasker::default());
        let mut response = (self.status(), Json(body)).into_response();

        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response.extensions_mut().insert(ReportedError(Arc::new(self)));
        response
    }
}

/// Result type for defense operations.
pub type DefenseResult<T> = Result<T, DefenseError>;

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ErrorKind; 9] = [
        ErrorKind::ValidationFailed,
        ErrorKind::RequestTooLarge,
        ErrorKind::UnsupportedMediaType,
        ErrorKind::RateLimitExceeded,
        ErrorKind::AuthenticationRequired,
        ErrorKind::AuthorizationInsufficient,
        ErrorKind::ExternalServiceFailure,
        ErrorKind::OperationTimedOut,
        ErrorKind::InternalError,
    ];

    #[test]
    fn test_status_mapping() {
        let statuses: Vec<u16> = ALL_KINDS.iter().map(|k| k.status().as_u16()).collect();
        assert_eq!(statuses, vec![400, 413, 415, 429, 401, 403, 502, 408, 500]);
    }

    #[test]
    fn test_default_severities() {
        assert_eq!(ErrorKind::ValidationFailed.default_severity(), ErrorSeverity::Low);
        assert_eq!(ErrorKind::RateLimitExceeded.default_severity(), ErrorSeverity::Low);
        assert_eq!(
            ErrorKind::AuthenticationRequired.default_severity(),
            ErrorSeverity::Medium
        );
        assert_eq!(ErrorKind::InternalError.default_severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_rate_limit_code_carries_class() {
        let err = DefenseError::rate_limited("AUTH", Duration::from_millis(1500));
        assert_eq!(err.code(), "RATE_LIMIT_AUTH");
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_secs(), Some(2));
    }

    #[test]
    fn test_render_validation_in_production() {
        let err = DefenseError::invalid_field("prompt", "too long")
            .with_details(json!({ "score": 20 }))
            .with_internal("stack");
        let body = err.render(Environment::Production, &FieldMasker::default());

        assert_eq!(body["error"], true);
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["errors"][0]["field"], "prompt");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(body.get("details").is_none());
        assert!(body.get("debug").is_none());
    }

    #[test]
    fn test_render_development_masks_details() {
        let masker = FieldMasker::new(&["apiKey".to_string()]);
        let err = DefenseError::authentication_required("Invalid API key")
            .with_details(json!({ "apiKey": "sk-live-123456789" }));
        let body = err.render(Environment::Development, &masker);

        assert_eq!(body["details"]["apiKey"], "sk-***********789");
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn test_internal_message_hidden() {
        let err = DefenseError::internal("db pool exhausted at pool.rs:42");
        let body = err.render(Environment::Production, &FieldMasker::default());
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("pool.rs"));
    }

    #[test]
    fn test_into_response_sets_retry_after() {
        let response = DefenseError::rate_limited("GENERAL", Duration::from_secs(30)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
        assert!(response.extensions().get::<ReportedError>().is_some());
    }

    #[test]
    fn test_display() {
        let err = DefenseError::too_large(1024);
        assert_eq!(err.to_string(), "REQUEST_TOO_LARGE: Request body exceeds the 1024 byte limit");
    }
}
