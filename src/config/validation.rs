//! Configuration validation.
//!
//! Semantic checks serde cannot express: non-zero limits, ordered bounds,
//! parseable addresses and upstream URLs. Every issue is collected so an
//! operator sees the whole list in one pass.

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::{ClassLimit, GuardConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending key.
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        issues.push(ValidationIssue::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        issues.push(ValidationIssue::new("listener.request_timeout_secs", "must be > 0"));
    }

    if config.limits.max_body_bytes == 0 {
        issues.push(ValidationIssue::new("limits.max_body_bytes", "must be > 0"));
    }

    if config.injection.max_length == 0 {
        issues.push(ValidationIssue::new("injection.max_length", "must be > 0"));
    }

    let geometry = &config.geometry;
    if geometry.max_nesting == 0 {
        issues.push(ValidationIssue::new("geometry.max_nesting", "must be > 0"));
    }
    if geometry.max_coordinates == 0 {
        issues.push(ValidationIssue::new("geometry.max_coordinates", "must be > 0"));
    }
    check_bounds(&mut issues, "geometry.lng_bounds", geometry.lng_bounds, 180.0);
    check_bounds(&mut issues, "geometry.lat_bounds", geometry.lat_bounds, 90.0);

    let rate = &config.rate_limit;
    for (name, policy) in [
        ("generative", &rate.generative),
        ("geospatial", &rate.geospatial),
        ("auth", &rate.auth),
        ("general", &rate.general),
    ] {
        check_class(&mut issues, name, policy);
    }
    if rate.sweep_interval_secs == 0 {
        issues.push(ValidationIssue::new("rate_limit.sweep_interval_secs", "must be > 0"));
    }
    let longest_window = [&rate.generative, &rate.geospatial, &rate.auth, &rate.general]
        .iter()
        .map(|policy| policy.window_secs)
        .max()
        .unwrap_or(0);
    if rate.idle_eviction_secs < longest_window {
        issues.push(ValidationIssue::new(
            "rate_limit.idle_eviction_secs",
            format!("must be at least the longest class window ({longest_window}s)"),
        ));
    }

    for (name, value) in [
        ("upstream.geospatial_url", &config.upstream.geospatial_url),
        ("upstream.generative_url", &config.upstream.generative_url),
    ] {
        if let Some(raw) = value {
            match Url::parse(raw) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => issues.push(ValidationIssue::new(
                    name,
                    format!("unsupported scheme '{}'", url.scheme()),
                )),
                Err(e) => issues.push(ValidationIssue::new(name, e.to_string())),
            }
        }
    }
    if config.upstream.timeout_secs == 0 {
        issues.push(ValidationIssue::new("upstream.timeout_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        issues.push(ValidationIssue::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn check_bounds(issues: &mut Vec<ValidationIssue>, field: &str, bounds: [f64; 2], limit: f64) {
    let [min, max] = bounds;
    if !(min.is_finite() && max.is_finite()) || min > max {
        issues.push(ValidationIssue::new(field, "must be an ordered [min, max] pair"));
    } else if min < -limit || max > limit {
        issues.push(ValidationIssue::new(
            field,
            format!("must lie within [-{limit}, {limit}]"),
        ));
    }
}

fn check_class(issues: &mut Vec<ValidationIssue>, name: &str, policy: &ClassLimit) {
    if policy.limit == 0 {
        issues.push(ValidationIssue::new(format!("rate_limit.{name}.limit"), "must be > 0"));
    }
    if policy.window_secs == 0 {
        issues.push(ValidationIssue::new(
            format!("rate_limit.{name}.window_secs"),
            "must be > 0",
        ));
    }
}
