//! Configuration validation system.

use super::types::ServerConfig;

/// Smallest head buffer that can still hold a request line.
const MIN_HEADER_SIZE: usize = 16;

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

    /// Get all validation issues.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Join error messages as `field: message` pairs.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &ServerConfig) -> ValidationResult;
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
    fn validate(&self, config: &ServerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let ws = &config.websocket;

        if config.http.read_timeout.is_zero() {
            result.add_error(ValidationError::error(
                "http.read_timeout",
                "Read timeout must be greater than zero",
            ));
        }

        if config.http.max_header_size < MIN_HEADER_SIZE {
            result.add_error(ValidationError::error(
                "http.max_header_size",
                format!("Header buffer must be at least {MIN_HEADER_SIZE} bytes"),
            ));
        }

        if ws.session.wait_time.is_zero() {
            result.add_error(ValidationError::error(
                "websocket.session.wait_time",
                "Wait time must be greater than zero",
            ));
        }

        if ws.session.drain_timeout.is_zero() {
            result.add_error(ValidationError::error(
                "websocket.session.drain_timeout",
                "Drain timeout must be greater than zero",
            ));
        }

        if ws.protocol.fragment_size == 0 || ws.protocol.fragment_size > ws.limits.max_frame_size
        {
            result.add_error(ValidationError::error(
                "websocket.protocol.fragment_size",
                "Fragment size must be between 1 and the maximum frame size",
            ));
        }

        if ws.limits.max_frame_size > ws.limits.max_message_size {
            result.add_error(ValidationError::warning(
                "websocket.limits.max_frame_size",
                "Frames larger than the message limit can never be delivered",
            ));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let result = BasicValidator::new().validate(&ServerConfig::default());
        assert!(result.is_valid());
        assert!(result.errors().is_empty());
    }

    #[test]
    fn test_zero_wait_time_rejected() {
        let mut config = ServerConfig::default();
        config.websocket.session.wait_time = Duration::ZERO;

        let result = BasicValidator::new().validate(&config);
        assert!(!result.is_valid());
        assert!(result.summary().contains("websocket.session.wait_time"));
    }

    #[test]
    fn test_fragment_size_bounds() {
        let mut config = ServerConfig::default();
        config.websocket.protocol.fragment_size = 0;
        assert!(!BasicValidator::new().validate(&config).is_valid());

        config.websocket.protocol.fragment_size = config.websocket.limits.max_frame_size + 1;
        assert!(!BasicValidator::new().validate(&config).is_valid());
    }

    #[test]
    fn test_oversized_frame_limit_is_warning() {
        let mut config = ServerConfig::default();
        config.websocket.limits.max_frame_size = config.websocket.limits.max_message_size * 2;

        let result = BasicValidator::new().validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 1);
    }
}
