//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_rejected_total` (counter): rejected requests by error code
//! - `guard_injection_flagged_total` (counter): flagged prompts by severity
//! - `guard_geometry_rejected_total` (counter): rejected geometries
//! - `guard_rate_limited_total` (counter): rate limit rejections by class
//! - `guard_rate_windows` (gauge): live rate windows
//!
//! Recording is a no-op until a recorder is installed, so the functions are
//! safe to call from tests and the CLI.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::security::injection::RiskSeverity;
use crate::security::rate_limit::EndpointClass;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rejection(code: &str) {
    counter!("guard_requests_rejected_total", "code" => code.to_string()).increment(1);
}

pub fn record_injection_flagged(severity: RiskSeverity) {
    counter!("guard_injection_flagged_total", "severity" => severity.to_string()).increment(1);
}

pub fn record_geometry_rejected() {
    counter!("guard_geometry_rejected_total").increment(1);
}

pub fn record_rate_limited(class: EndpointClass) {
    counter!("guard_rate_limited_total", "class" => class.as_str()).increment(1);
}

pub fn record_window_count(count: usize) {
    gauge!("guard_rate_windows").set(count as f64);
}
