//! HTTP client for the geospatial and generative backends.

use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::security::error::DefenseError;

/// Backends reachable through the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    Geospatial,
    Generative,
}

impl UpstreamService {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Geospatial => "geospatial",
            Self::Generative => "generative",
        }
    }
}

impl fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from calling an upstream service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No URL configured for the service.
    #[error("{0} service is not configured")]
    NotConfigured(UpstreamService),

    /// No response within the configured timeout.
    #[error("{service} service timed out after {timeout:?}")]
    Timeout {
        service: UpstreamService,
        timeout: Duration,
    },

    /// Connection failed or was dropped.
    #[error("{service} service unavailable: {source}")]
    Unavailable {
        service: UpstreamService,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("{service} service rejected the request with status {status}")]
    Rejected { service: UpstreamService, status: u16 },

    /// The service answered 2xx with a body that is not JSON.
    #[error("{service} service returned an invalid body: {message}")]
    InvalidResponse {
        service: UpstreamService,
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

impl From<UpstreamError> for DefenseError {
    fn from(err: UpstreamError) -> Self {
        let cause = err.to_string();
        match err {
            UpstreamError::NotConfigured(service) => DefenseError::external(
                service.as_str(),
                "not_configured",
                format!("The {service} service is not available"),
            ),
            UpstreamError::Timeout { service, .. } => {
                DefenseError::timed_out(&format!("{service} request")).with_internal(cause)
            }
            UpstreamError::Unavailable { service, .. } => DefenseError::external(
                service.as_str(),
                "unavailable",
                format!("The {service} service is unavailable"),
            )
            .with_internal(cause),
            UpstreamError::Rejected { service, status } => DefenseError::external(
                service.as_str(),
                "rejected",
                format!("The {service} service rejected the request"),
            )
            .with_details(json!({
                "service": service.as_str(),
                "reason": "rejected",
                "upstreamStatus": status,
            })),
            UpstreamError::InvalidResponse { service, .. } => DefenseError::external(
                service.as_str(),
                "invalid_response",
                format!("The {service} service returned an invalid response"),
            )
            .with_internal(cause),
            UpstreamError::Client(_) => DefenseError::internal(cause),
        }
    }
}

/// JSON-over-HTTP client with one timeout for every call.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    geospatial_url: Option<String>,
    generative_url: Option<String>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> UpstreamResult<Self> {
        Self::with_timeout(config, Duration::from_secs(config.timeout_secs))
    }

    pub fn with_timeout(config: &UpstreamConfig, timeout: Duration) -> UpstreamResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(UpstreamError::Client)?;
        Ok(Self {
            http,
            geospatial_url: config.geospatial_url.clone(),
            generative_url: config.generative_url.clone(),
            timeout,
        })
    }

    fn url(&self, service: UpstreamService) -> Option<&str> {
        match service {
            UpstreamService::Geospatial => self.geospatial_url.as_deref(),
            UpstreamService::Generative => self.generative_url.as_deref(),
        }
    }

    /// POST `body` to the service and decode the JSON reply.
    pub async fn post_json(&self, service: UpstreamService, body: &Value) -> UpstreamResult<Value> {
        let url = self.url(service).ok_or(UpstreamError::NotConfigured(service))?;

        tracing::debug!(service = %service, url = %url, "Calling upstream");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(service, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(service = %service, status = status.as_u16(), "Upstream rejected request");
            return Err(UpstreamError::Rejected {
                service,
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                self.classify(service, e)
            } else {
                UpstreamError::InvalidResponse {
                    service,
                    message: e.to_string(),
                }
            }
        })
    }

    fn classify(&self, service: UpstreamService, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            tracing::warn!(service = %service, timeout = ?self.timeout, "Upstream timed out");
            UpstreamError::Timeout {
                service,
                timeout: self.timeout,
            }
        } else {
            tracing::warn!(service = %service, error = %err, "Upstream unavailable");
            UpstreamError::Unavailable {
                service,
                source: err,
            }
        }
    }
}
