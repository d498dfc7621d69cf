//! Security audit events.
//!
//! Every flagged prompt, rejected geometry, rate-limit rejection and rendered
//! error produces one [`SecurityEvent`]. Events go through an [`AuditSink`];
//! the default sink writes them to the `security_audit` tracing target.

use axum::{extract::ConnectInfo, http::Request};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;
use uuid::Uuid;

use crate::security::error::ErrorSeverity;
use crate::security::injection::RiskSeverity;

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<ErrorSeverity> for EventSeverity {
    fn from(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Low => Self::Low,
            ErrorSeverity::Medium => Self::Medium,
            ErrorSeverity::High => Self::High,
        }
    }
}

impl From<RiskSeverity> for EventSeverity {
    fn from(severity: RiskSeverity) -> Self {
        match severity {
            RiskSeverity::Minimal | RiskSeverity::Low => Self::Low,
            RiskSeverity::Medium => Self::Medium,
            RiskSeverity::High => Self::High,
            RiskSeverity::Critical => Self::Critical,
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Who sent a request and where it was going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    /// Client identity derived from the transport address.
    pub client: String,
    /// Request path.
    pub endpoint: String,
}

impl RequestOrigin {
    pub fn new(client: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Derive the origin from the connection info axum attaches to requests.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(client, request.uri().path())
    }
}

/// A structured security log entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: &'static str,
    pub severity: EventSeverity,
    pub client: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Value,
}

impl SecurityEvent {
    pub fn new(
        event_type: &'static str,
        severity: impl Into<EventSeverity>,
        origin: &RequestOrigin,
        detail: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            severity: severity.into(),
            client: origin.client.clone(),
            endpoint: origin.endpoint.clone(),
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// Destination for security events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

/// Writes events as JSON on the `security_audit` tracing target.
#[derive(Debug, Clone)]
pub struct TracingAuditSink {
    min_severity: EventSeverity,
}

impl TracingAuditSink {
    pub fn new(min_severity: EventSeverity) -> Self {
        Self { min_severity }
    }
}

impl Default for TracingAuditSink {
    fn default() -> Self {
        Self::new(EventSeverity::Low)
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: SecurityEvent) {
        if event.severity < self.min_severity {
            return;
        }
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| event.event_type.to_string());
        match event.severity {
            EventSeverity::Low | EventSeverity::Medium => tracing::warn!(
                target: "security_audit",
                event_type = event.event_type,
                severity = %event.severity,
                client = %event.client,
                event = %payload,
                "Security event"
            ),
            EventSeverity::High | EventSeverity::Critical => tracing::error!(
                target: "security_audit",
                event_type = event.event_type,
                severity = %event.severity,
                client = %event.client,
                event = %payload,
                "Security event"
            ),
        }
    }
}

/// Keeps events in memory. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde_json::json;

    #[test]
    fn test_origin_from_connect_info() {
        let mut request = Request::builder()
            .uri("/api/chat?x=1")
            .body(Body::empty())
            .unwrap();
        let addr: SocketAddr = "203.0.113.9:51000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        let origin = RequestOrigin::from_request(&request);
        assert_eq!(origin.client, "203.0.113.9");
        assert_eq!(origin.endpoint, "/api/chat");
    }

    #[test]
    fn test_origin_without_connect_info() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(RequestOrigin::from_request(&request).client, "unknown");
    }

    #[test]
    fn test_event_serialization() {
        let origin = RequestOrigin::new("10.0.0.1", "/api/analysis");
        let event = SecurityEvent::new(
            "geometry_rejected",
            ErrorSeverity::Low,
            &origin,
            json!({ "reason": "ring not closed" }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "geometry_rejected");
        assert_eq!(value["severity"], "LOW");
        assert_eq!(value["endpoint"], "/api/analysis");
    }

    #[test]
    fn test_severity_conversion() {
        assert_eq!(EventSeverity::from(RiskSeverity::Minimal), EventSeverity::Low);
        assert_eq!(EventSeverity::from(RiskSeverity::Critical), EventSeverity::Critical);
        assert_eq!(EventSeverity::from(ErrorSeverity::High), EventSeverity::High);
    }

    #[test]
    fn test_memory_sink_filters_by_type() {
        let sink = MemoryAuditSink::new();
        let origin = RequestOrigin::new("c", "/e");
        sink.record(SecurityEvent::new("a", EventSeverity::Low, &origin, Value::Null));
        sink.record(SecurityEvent::new("b", EventSeverity::High, &origin, Value::Null));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.of_type("b").len(), 1);
    }
}
