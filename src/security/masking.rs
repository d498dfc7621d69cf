//! Sensitive value masking for logs and error details.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Mask a single value: keep the first and last three characters of values
/// longer than six characters, mask shorter values entirely.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 6), tail)
    } else {
        "*".repeat(chars.len())
    }
}

/// Masks values of configured field names inside JSON payloads.
///
/// Field names are compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct FieldMasker {
    fields: HashSet<String>,
}

impl FieldMasker {
    pub fn new(fields: &[String]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_ascii_lowercase()).collect(),
        }
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.fields.contains(&name.to_ascii_lowercase())
    }

    /// Return a copy of `value` with every sensitive field masked, at any depth.
    pub fn mask_json(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut masked = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let replacement = if self.is_sensitive(key) {
                        mask_leaf(inner)
                    } else {
                        self.mask_json(inner)
                    };
                    masked.insert(key.clone(), replacement);
                }
                Value::Object(masked)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_json(v)).collect()),
            other => other.clone(),
        }
    }
}

fn mask_leaf(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_value(s)),
        Value::Null => Value::Null,
        Value::Number(n) => Value::String(mask_value(&n.to_string())),
        Value::Bool(_) => Value::String("****".to_string()),
        Value::Array(_) | Value::Object(_) => Value::String("[REDACTED]".to_string()),
    }
}
