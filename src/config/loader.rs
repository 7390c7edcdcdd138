//! Configuration file loader.

use super::error::{ConfigError, ConfigResult};
use super::types::ServerConfig;
use super::validation::Validator;
use std::path::Path;

/// Configuration loader with validation support.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Validators to run on loaded configuration.
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator to the loader.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable, the TOML is
    /// malformed, or a validator rejects the result.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<ServerConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.load_str(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn load_str(&self, content: &str) -> ConfigResult<ServerConfig> {
        let config: ServerConfig = toml::from_str(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Load configuration, or the defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<ServerConfig> {
        let path = path.as_ref();
        if path.exists() {
            self.load(path)
        } else {
            let config = ServerConfig::default();
            self.validate(&config)?;
            Ok(config)
        }
    }

    /// Validate a configuration against all registered validators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every failed field.
    pub fn validate(&self, config: &ServerConfig) -> ConfigResult<()> {
        for validator in &self.validators {
            let result = validator.validate(config);
            if !result.is_valid() {
                return Err(ConfigError::ValidationError(result.summary()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasicValidator;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_string() {
        let loader = ConfigLoader::new();
        let config = loader
            .load_str(
                r#"
            [listener]
            port = 9090
        "#,
            )
            .unwrap();
        assert_eq!(config.listener.port, 9090);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("server.toml");

        std::fs::write(
            &config_path,
            r#"
            [listener]
            address = "127.0.0.1"
            port = 7000
        "#,
        )
        .unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load(&config_path).unwrap();
        assert_eq!(config.listener.socket_addr().to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let loader = ConfigLoader::new();
        let result = loader.load("/nonexistent/path/server.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default() {
        let loader = ConfigLoader::new().with_validator(BasicValidator::new());
        let config = loader.load_or_default("/nonexistent/path").unwrap();
        assert_eq!(config.listener.port, 8080);
    }

    #[test]
    fn test_validator_rejects_zero_wait_time() {
        let loader = ConfigLoader::new().with_validator(BasicValidator::new());
        let result = loader.load_str(
            r#"
            [websocket.session]
            wait_time = "0s"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
