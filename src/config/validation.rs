//! Configuration validation system.

use super::types::ClusterConfig;
use std::time::Duration;

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all validation errors.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors_only(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &ClusterConfig) -> ValidationResult;
}

/// Built-in validator for basic configuration checks.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &ClusterConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.service.name.is_empty() {
            result.add_error(ValidationError::error(
                "service.name",
                "Service name cannot be empty",
            ));
        }
        if config.service.id.is_empty() {
            result.add_error(ValidationError::error(
                "service.id",
                "Service id cannot be empty",
            ));
        }

        let intervals: [(&str, Duration); 8] = [
            ("discovery.interval", config.discovery.interval),
            ("discovery.request_timeout", config.discovery.request_timeout),
            ("election.watch_interval", config.election.watch_interval),
            ("election.refresh_interval", config.election.refresh_interval),
            ("election.session_ttl", config.election.session_ttl),
            (
                "link_cache.relation_sync_interval",
                config.link_cache.relation_sync_interval,
            ),
            (
                "link_cache.offline_sync_interval",
                config.link_cache.offline_sync_interval,
            ),
            ("link_cache.request_timeout", config.link_cache.request_timeout),
        ];
        for (field, value) in intervals {
            if value.is_zero() {
                result.add_error(ValidationError::error(field, "Interval cannot be zero"));
            }
        }

        // A session renewed no faster than it expires is lost between refreshes.
        if config.election.enabled
            && config.election.refresh_interval >= config.election.session_ttl
        {
            result.add_error(ValidationError::error(
                "election.refresh_interval",
                "Refresh interval must be shorter than the session TTL",
            ));
        }

        if config.discovery.blacklist.contains(&config.service.name) {
            result.add_error(ValidationError::warning(
                "discovery.blacklist",
                "Own service is always excluded; blacklisting it has no effect",
            ));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::link_cache::LinkMode;

    #[test]
    fn test_basic_validator_valid() {
        let config = ClusterConfig::default();
        let validator = BasicValidator::new();
        let result = validator.validate(&config);
        assert!(result.is_valid());
    }

    #[test]
    fn test_basic_validator_empty_name() {
        let mut config = ClusterConfig::default();
        config.service.name = String::new();

        let result = BasicValidator::new().validate(&config);

        assert!(!result.is_valid());
        assert!(result.errors()[0].message.contains("name cannot be empty"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = ClusterConfig::default();
        config.discovery.interval = Duration::ZERO;

        let result = BasicValidator::new().validate(&config);
        assert!(!result.is_valid());
        assert_eq!(result.errors()[0].field, "discovery.interval");
    }

    #[test]
    fn test_refresh_must_beat_ttl() {
        let mut config = ClusterConfig::default();
        config.election.refresh_interval = Duration::from_secs(15);
        config.election.session_ttl = Duration::from_secs(15);

        let result = BasicValidator::new().validate(&config);
        assert!(!result.is_valid());

        config.election.enabled = false;
        assert!(BasicValidator::new().validate(&config).is_valid());
    }

    #[test]
    fn test_dashed_name_allowed_in_shared_mode() {
        let mut config = ClusterConfig::default();
        config.service.name = "edge-gate".to_string();
        config.link_cache.mode = LinkMode::Shared;
        assert!(BasicValidator::new().validate(&config).is_valid());
    }

    #[test]
    fn test_blacklisting_self_is_a_warning() {
        let mut config = ClusterConfig::default();
        config.discovery.blacklist.push(config.service.name.clone());

        let result = BasicValidator::new().validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 1);
        assert!(result.errors_only().is_empty());
    }

    #[test]
    fn test_validation_result_merge() {
        let mut result1 = ValidationResult::new();
        result1.add_error(ValidationError::error("field1", "error1"));

        let mut result2 = ValidationResult::new();
        result2.add_error(ValidationError::warning("field2", "warning1"));

        result1.merge(result2);
        assert_eq!(result1.errors().len(), 2);
    }
}
