//! Server error types.

use crate::config::ConfigError;
use crate::modules::websocket_handler::WebSocketError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by [`WebServer`](super::WebServer) operations.
///
/// Per-connection failures never show up here; they are logged and
/// contained to the connection's task.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The address that failed to bind.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,

    /// The server was stopped and cannot be started again.
    #[error("server has been stopped")]
    Closed,

    /// A service is already registered on this path.
    #[error("a WebSocket service is already registered on '{0}'")]
    DuplicateService(String),

    /// The service could not be created.
    #[error("invalid WebSocket service: {0}")]
    Service(#[from] WebSocketError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
