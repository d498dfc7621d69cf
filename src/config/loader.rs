//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationIssue};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let config: GuardConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Environment, RejectLevel};

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.limits.max_body_bytes, 1024 * 1024);
        assert_eq!(config.rate_limit.generative.limit, 10);
        assert!(config.rate_limit.auth.skip_successful);
        assert_eq!(config.errors.environment, Environment::Production);
    }

    #[test]
    fn test_partial_sections_override() {
        let config = parse_config(
            r#"
            [errors]
            environment = "development"

            [injection]
            reject_at = "high"

            [rate_limit.generative]
            limit = 3
            window_secs = 60
            "#,
        )
        .unwrap();

        assert!(config.errors.environment.is_development());
        assert_eq!(config.injection.reject_at, RejectLevel::High);
        assert_eq!(config.rate_limit.generative.limit, 3);
        assert!(!config.rate_limit.generative.skip_successful);
        // untouched classes keep their defaults
        assert_eq!(config.rate_limit.geospatial.limit, 30);
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("[limits\nmax_body_bytes = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error_lists_every_issue() {
        let err = parse_config(
            r#"
            [limits]
            max_body_bytes = 0

            [geometry]
            max_nesting = 0
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(issues) => assert_eq!(issues.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/field-guard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
