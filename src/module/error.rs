//! Handler error types and result aliases.

use thiserror::Error;

/// Error returned by a handler callback. Any error type converts into it
/// with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for handler callbacks.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// A handler callback panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler panicked: {message}")]
pub struct HandlerPanic {
    /// Panic payload, when it was a string.
    pub message: String,
}

impl HandlerPanic {
    /// Build from a `catch_unwind` payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self { message }
    }
}

/// Render an error and its source chain, one cause per line.
#[must_use]
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}
