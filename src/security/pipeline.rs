//! Composition of the defense components.
//!
//! The pipeline owns the detector, the geometry validator and the rate
//! limiter, and is the single place where rejections are turned into audit
//! events and metrics. HTTP glue calls into it; nothing here knows about
//! routing.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{Environment, GuardConfig};
use crate::observability::metrics;
use crate::security::audit::{AuditSink, EventSeverity, RequestOrigin, SecurityEvent};
use crate::security::error::{DefenseError, DefenseResult};
use crate::security::geometry::{GeoPayload, GeometryKind, GeometryValidator};
use crate::security::injection::{InjectionDetector, RiskAssessment};
use crate::security::masking::FieldMasker;
use crate::security::rate_limit::{Admission, Clock, EndpointClass, RateLimitStore, RateLimiter};

/// Request field checked by the injection detector.
pub const PROMPT_FIELD: &str = "prompt";

/// Request field checked by the geometry validator.
pub const GEOMETRY_FIELD: &str = "aoiGeoJSON";

pub struct DefensePipeline {
    detector: InjectionDetector,
    geometry: GeometryValidator,
    limiter: RateLimiter,
    masker: FieldMasker,
    sink: Arc<dyn AuditSink>,
    environment: Environment,
    max_body_bytes: usize,
}

impl DefensePipeline {
    /// Build every component from `config`. The window store and clock are
    /// passed in so they can outlive a config reload.
    pub fn from_config(
        config: &GuardConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            detector: InjectionDetector::new(config.injection.clone(), sink.clone()),
            geometry: GeometryValidator::new(config.geometry.clone(), sink.clone()),
            limiter: RateLimiter::new(config.rate_limit.clone(), store, clock, sink.clone()),
            masker: FieldMasker::new(&config.errors.sensitive_fields),
            sink,
            environment: config.errors.environment,
            max_body_bytes: config.limits.max_body_bytes,
        }
    }

    pub fn detector(&self) -> &InjectionDetector {
        &self.detector
    }

    pub fn geometry(&self) -> &GeometryValidator {
        &self.geometry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn masker(&self) -> &FieldMasker {
        &self.masker
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn screen_prompt(&self, origin: &RequestOrigin, text: &str) -> DefenseResult<RiskAssessment> {
        self.detector.screen(PROMPT_FIELD, text, origin)
    }

    pub fn validate_geometry(
        &self,
        origin: &RequestOrigin,
        payload: &GeoPayload,
    ) -> DefenseResult<GeometryKind> {
        self.geometry.check(GEOMETRY_FIELD, payload, origin)
    }

    pub fn admit(&self, origin: &RequestOrigin, class: EndpointClass) -> DefenseResult<Admission> {
        self.limiter.enforce(origin, class)
    }

    pub fn refund(&self, origin: &RequestOrigin, class: EndpointClass, admission: &Admission) {
        self.limiter.refund(origin, class, admission);
    }

    /// Record a rejection that is about to be sent to the client.
    pub fn report(&self, origin: &RequestOrigin, err: &DefenseError) {
        metrics::record_rejection(err.code());
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(
                client = %origin.client,
                endpoint = %origin.endpoint,
                code = err.code(),
                status = status.as_u16(),
                "Request failed"
            );
        } else {
            tracing::info!(
                client = %origin.client,
                endpoint = %origin.endpoint,
                code = err.code(),
                status = status.as_u16(),
                "Request rejected"
            );
        }
        self.sink.record(SecurityEvent::new(
            "request_rejected",
            EventSeverity::from(err.severity()),
            origin,
            err.log_detail(&self.masker),
        ));
    }

    /// Client body for `err` under the configured environment.
    pub fn render(&self, err: &DefenseError) -> Value {
        err.render(self.environment, &self.masker)
    }

    /// Snapshot for the admin endpoint.
    pub fn stats(&self) -> Value {
        json!({
            "rateLimiting": self.limiter.enabled(),
            "windows": self.limiter.store().len(),
            "patterns": self.detector.catalogue().len(),
            "environment": self.environment,
        })
    }
}
