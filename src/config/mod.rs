//! # Configuration System
//!
//! TOML-based configuration for an embedded server instance.
//!
//! ## Features
//!
//! - TOML configuration file parsing with defaults for every field
//! - Human-readable durations (`"90s"`, `"500ms"`)
//! - Pluggable validators run at load time
//!
//! ## Example Configuration
//!
//! ```toml
//! [listener]
//! address = "0.0.0.0"
//! port = 8080
//!
//! [http]
//! read_timeout = "90s"
//! keep_alive = true
//!
//! [websocket.protocol]
//! compression = true
//!
//! [websocket.session]
//! wait_time = "60s"
//!
//! [logging]
//! level = "debug"
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{ListenerConfig, LogFormat, LogLevel, LoggingConfig, ServerConfig};
pub use validation::{
    BasicValidator, ValidationError, ValidationResult, ValidationSeverity, Validator,
};
