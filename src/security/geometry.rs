//! Structural validation of untrusted GeoJSON geometries.
//!
//! # Order (fail fast)
//! 1. `type` must be Point, LineString or Polygon
//! 2. one bounded walk over `coordinates`: nesting depth, position count,
//!    position shape and longitude/latitude bounds; the walk stops at the
//!    first violation or as soon as a maximum is exceeded
//! 3. kind-specific structure (single position, >= 2 positions, closed rings)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::config::GeometryConfig;
use crate::observability::metrics;
use crate::security::audit::{AuditSink, EventSeverity, RequestOrigin, SecurityEvent};
use crate::security::error::{DefenseError, DefenseResult};

/// Geometry types accepted for areas of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

impl GeometryKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Point" => Some(Self::Point),
            "LineString" => Some(Self::LineString),
            "Polygon" => Some(Self::Polygon),
            _ => None,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
        };
        write!(f, "{s}")
    }
}

/// Untrusted geometry as received. `type` is kept raw so unknown kinds are
/// reported by the validator rather than by the JSON decoder.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeoPayload {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
    pub measured_depth: usize,
    pub measured_coordinate_count: usize,
}

/// Counters for the bounded walk.
struct Walk<'a> {
    config: &'a GeometryConfig,
    depth: usize,
    count: usize,
}

impl Walk<'_> {
    fn visit(&mut self, value: &Value, depth: usize) -> Result<(), String> {
        let items = value
            .as_array()
            .ok_or_else(|| "coordinates must be nested arrays of numbers".to_string())?;

        self.depth = self.depth.max(depth);
        if depth > self.config.max_nesting {
            return Err(format!(
                "coordinates nesting exceeds the maximum depth of {}",
                self.config.max_nesting
            ));
        }

        if items.iter().any(Value::is_number) {
            return self.position(items);
        }

        for item in items {
            self.visit(item, depth + 1)?;
        }
        Ok(())
    }

    fn position(&mut self, items: &[Value]) -> Result<(), String> {
        let numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
        if numbers.len() != items.len() {
            return Err("a position must contain only numbers".to_string());
        }
        let &[lng, lat] = numbers.as_slice() else {
            return Err(format!(
                "a position must contain exactly two numbers [longitude, latitude], got {}",
                numbers.len()
            ));
        };

        let [lng_min, lng_max] = self.config.lng_bounds;
        if !(lng_min..=lng_max).contains(&lng) {
            return Err(format!(
                "longitude {lng} is outside the allowed range [{lng_min}, {lng_max}]"
            ));
        }
        let [lat_min, lat_max] = self.config.lat_bounds;
        if !(lat_min..=lat_max).contains(&lat) {
            return Err(format!(
                "latitude {lat} is outside the allowed range [{lat_min}, {lat_max}]"
            ));
        }

        self.count += 1;
        if self.count > self.config.max_coordinates {
            return Err(format!(
                "geometry has more than the maximum of {} positions",
                self.config.max_coordinates
            ));
        }
        Ok(())
    }
}

/// Validates [`GeoPayload`]s against configured limits. No I/O.
pub struct GeometryValidator {
    config: GeometryConfig,
    sink: Arc<dyn AuditSink>,
}

impl GeometryValidator {
    pub fn new(config: GeometryConfig, sink: Arc<dyn AuditSink>) -> Self {
        Self { config, sink }
    }

    pub fn validate(&self, payload: &GeoPayload) -> GeometryValidationResult {
        let Some(kind) = GeometryKind::parse(&payload.kind) else {
            return rejected(
                format!(
                    "unsupported geometry type '{}', expected Point, LineString or Polygon",
                    payload.kind
                ),
                0,
                0,
            );
        };

        let mut walk = Walk {
            config: &self.config,
            depth: 0,
            count: 0,
        };
        if let Err(reason) = walk.visit(&payload.coordinates, 1) {
            return rejected(reason, walk.depth, walk.count);
        }

        if let Err(reason) = check_structure(kind, &payload.coordinates) {
            return rejected(reason, walk.depth, walk.count);
        }

        tracing::debug!(
            kind = %kind,
            depth = walk.depth,
            positions = walk.count,
            "Geometry accepted"
        );
        GeometryValidationResult {
            valid: true,
            reason: None,
            measured_depth: walk.depth,
            measured_coordinate_count: walk.count,
        }
    }

    /// Validate on behalf of a request; rejections are audited and returned
    /// as `ValidationFailed` against `field`.
    pub fn check(
        &self,
        field: &str,
        payload: &GeoPayload,
        origin: &RequestOrigin,
    ) -> DefenseResult<GeometryKind> {
        let result = self.validate(payload);
        if result.valid {
            return GeometryKind::parse(&payload.kind)
                .ok_or_else(|| DefenseError::internal("validated geometry lost its kind"));
        }

        let reason = result
            .reason
            .clone()
            .unwrap_or_else(|| "invalid geometry".to_string());
        metrics::record_geometry_rejected();
        self.sink.record(SecurityEvent::new(
            "geometry_rejected",
            EventSeverity::Low,
            origin,
            json!({
                "kind": payload.kind,
                "reason": reason,
                "measuredDepth": result.measured_depth,
                "measuredCoordinateCount": result.measured_coordinate_count,
            }),
        ));

        Err(DefenseError::invalid_field(field, reason).with_details(json!({
            "measuredDepth": result.measured_depth,
            "measuredCoordinateCount": result.measured_coordinate_count,
        })))
    }
}

fn rejected(reason: String, depth: usize, count: usize) -> GeometryValidationResult {
    GeometryValidationResult {
        valid: false,
        reason: Some(reason),
        measured_depth: depth,
        measured_coordinate_count: count,
    }
}

/// `Some((lng, lat))` when `value` is a two-number position.
fn as_position(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [lng, lat] => Some((lng.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

/// `Some(positions)` when `value` is an array made only of positions.
fn as_positions(value: &Value) -> Option<Vec<(f64, f64)>> {
    value.as_array()?.iter().map(as_position).collect()
}

fn check_structure(kind: GeometryKind, coordinates: &Value) -> Result<(), String> {
    match kind {
        GeometryKind::Point => match as_position(coordinates) {
            Some(_) => Ok(()),
            None => Err("Point coordinates must be exactly one position".to_string()),
        },
        GeometryKind::LineString => {
            let positions = as_positions(coordinates)
                .ok_or_else(|| "LineString coordinates must be an array of positions".to_string())?;
            if positions.len() < 2 {
                return Err(format!(
                    "LineString must contain at least two positions, got {}",
                    positions.len()
                ));
            }
            Ok(())
        }
        GeometryKind::Polygon => {
            let rings = coordinates
                .as_array()
                .ok_or_else(|| "Polygon coordinates must be an array of rings".to_string())?;
            if rings.is_empty() {
                return Err("Polygon must contain at least one ring".to_string());
            }
            for (index, ring) in rings.iter().enumerate() {
                let positions = as_positions(ring).ok_or_else(|| {
                    format!("Polygon ring {index} must be an array of positions")
                })?;
                if positions.len() < 4 {
                    return Err(format!(
                        "Polygon ring {index} must contain at least four positions, got {}",
                        positions.len()
                    ));
                }
                if positions.first() != positions.last() {
                    return Err(format!(
                        "Polygon ring {index} is not closed: first and last positions differ"
                    ));
                }
            }
            Ok(())
        }
    }
}
