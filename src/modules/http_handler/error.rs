//! Error types for the HTTP handler module.

use http::StatusCode;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while reading or writing HTTP messages.
#[derive(Debug, Error)]
pub enum HttpError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The start line or a header line could not be split.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Invalid HTTP method.
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// Invalid or unsupported HTTP version.
    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    /// Invalid request target.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Invalid response status.
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Request head exceeded the configured buffer.
    #[error("Header too large: {size} bytes (max: {max})")]
    HeaderTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Declared body exceeded the configured limit.
    #[error("Body too large: {size} bytes (max: {max})")]
    BodyTooLarge {
        /// Declared size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// A transfer coding other than a lone `chunked`.
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// The peer did not deliver the message in time.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection before a message started.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl HttpError {
    /// Status code to answer with when this error ends a request.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_)
            | Self::InvalidMethod(_)
            | Self::InvalidVersion(_)
            | Self::InvalidUri(_)
            | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::HeaderTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedTransferEncoding(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Io(_) | Self::ConnectionClosed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the peer is gone and no response can be written.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}

/// Result type for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;

impl From<http::uri::InvalidUri> for HttpError {
    fn from(err: http::uri::InvalidUri) -> Self {
        HttpError::InvalidUri(err.to_string())
    }
}

impl From<http::method::InvalidMethod> for HttpError {
    fn from(err: http::method::InvalidMethod) -> Self {
        HttpError::InvalidMethod(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HttpError::MalformedRequest("Invalid request line: GET".to_string());
        assert_eq!(err.to_string(), "Malformed request: Invalid request line: GET");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let http_err = HttpError::from(io_err);
        assert!(matches!(http_err, HttpError::Io(_)));
        assert!(http_err.is_disconnect());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            HttpError::MalformedRequest(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::HeaderTooLarge { size: 9000, max: 8192 }.status_code(),
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
        );
        assert_eq!(
            HttpError::Timeout(Duration::from_secs(1)).status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            HttpError::UnsupportedTransferEncoding("gzip".to_string()).status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
    }
}
