//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::security::audit::EventSeverity;
use crate::security::rate_limit::EndpointClass;

/// Root configuration for the request guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Request size ceiling.
    pub limits: LimitsConfig,

    /// Prompt injection detector settings.
    pub injection: InjectionConfig,

    /// Geometry validator settings.
    pub geometry: GeometryConfig,

    /// Per endpoint class rate limits.
    pub rate_limit: RateLimitConfig,

    /// Error rendering and masking.
    pub errors: ErrorConfig,

    /// External services the guard sits in front of.
    pub upstream: UpstreamConfig,

    /// API keys accepted by the auth and admin endpoints.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time budget for one request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Prompt injection detector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Maximum prompt length in characters. Longer prompts never reach the detector.
    pub max_length: usize,

    /// Aggregate score above which a text is flagged even without a finding.
    pub flag_threshold: u32,

    /// Lowest risk severity at which a flagged prompt is rejected.
    pub reject_at: RejectLevel,

    /// Characters of the prompt kept in security log excerpts.
    pub excerpt_chars: usize,

    /// Cap on recorded occurrences per pattern.
    pub max_occurrences: usize,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            max_length: 4000,
            flag_threshold: 0,
            reject_at: RejectLevel::Medium,
            excerpt_chars: 120,
            max_occurrences: 32,
        }
    }
}

/// Risk severity floor for rejecting flagged prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

/// Geometry validator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Maximum number of positions across the whole geometry.
    pub max_coordinates: usize,

    /// Maximum array nesting depth of `coordinates`.
    pub max_nesting: usize,

    /// Inclusive longitude bounds.
    pub lng_bounds: [f64; 2],

    /// Inclusive latitude bounds.
    pub lat_bounds: [f64; 2],
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            max_coordinates: 10_000,
            max_nesting: 4,
            lng_bounds: [-180.0, 180.0],
            lat_bounds: [-90.0, 90.0],
        }
    }
}

/// Rate limit policy for one endpoint class.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ClassLimit {
    /// Requests accepted per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Give the slot back when the request succeeds.
    #[serde(default)]
    pub skip_successful: bool,
}

impl ClassLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Calls proxied to the generative-text backend.
    pub generative: ClassLimit,

    /// Calls proxied to the geospatial backend.
    pub geospatial: ClassLimit,

    /// Authentication attempts.
    pub auth: ClassLimit,

    /// Everything else.
    pub general: ClassLimit,

    /// How often idle windows are swept, in seconds.
    pub sweep_interval_secs: u64,

    /// Windows untouched for this long are evicted, in seconds.
    pub idle_eviction_secs: u64,
}

impl RateLimitConfig {
    pub fn policy(&self, class: EndpointClass) -> ClassLimit {
        match class {
            EndpointClass::Generative => self.generative,
            EndpointClass::Geospatial => self.geospatial,
            EndpointClass::Auth => self.auth,
            EndpointClass::General => self.general,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            generative: ClassLimit {
                limit: 10,
                window_secs: 60,
                skip_successful: false,
            },
            geospatial: ClassLimit {
                limit: 30,
                window_secs: 60,
                skip_successful: false,
            },
            auth: ClassLimit {
                limit: 5,
                window_secs: 15 * 60,
                skip_successful: true,
            },
            general: ClassLimit {
                limit: 100,
                window_secs: 15 * 60,
                skip_successful: false,
            },
            sweep_interval_secs: 60,
            idle_eviction_secs: 30 * 60,
        }
    }
}

/// Deployment environment; controls error detail verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorConfig {
    pub environment: Environment,

    /// Field names whose values are masked in logs and error details.
    pub sensitive_fields: Vec<String>,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            sensitive_fields: vec![
                "password".to_string(),
                "apiKey".to_string(),
                "api_key".to_string(),
                "token".to_string(),
                "secret".to_string(),
                "authorization".to_string(),
            ],
        }
    }
}

/// Upstream services.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the geospatial analysis backend.
    pub geospatial_url: Option<String>,

    /// Base URL of the generative-text backend.
    pub generative_url: Option<String>,

    /// Per call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            geospatial_url: None,
            generative_url: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Keys accepted by `/api/auth/verify`.
    pub api_keys: Vec<String>,

    /// Bearer key for `/admin/*`. Admin routes reject everything when unset.
    pub admin_key: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Minimum severity forwarded to the security audit log.
    pub audit_min_severity: EventSeverity,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            audit_min_severity: EventSeverity::Low,
        }
    }
}
