//! WebSocket error types.

use super::frame::CloseCode;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for WebSocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Errors that can occur during WebSocket handling.
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer broke the framing rules.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid frame contents (reserved opcode, bad close payload).
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame payload over the configured limit.
    #[error("Frame too large: {actual} bytes (max {max})")]
    FrameTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: u64,
    },

    /// A 64-bit payload length with its most significant bit set.
    #[error("Invalid frame length: {0:#x}")]
    InvalidLength(u64),

    /// Reassembled message over the configured limit.
    #[error("Message too large: {actual} bytes (max {max})")]
    MessageTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Size reached.
        actual: usize,
    },

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// A close code that must not appear on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// A compressed payload could not be inflated.
    #[error("Decompression failed: {0}")]
    Compression(String),

    /// The session is closed and no longer accepts writes.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No frame arrived within the wait time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Behavior setup rejected a value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WebSocketError {
    /// Close status to report for this error.
    ///
    /// Transport failures map to [`CloseCode::Abnormal`], which is never
    /// written to the wire.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Protocol(_)
            | Self::InvalidFrame(_)
            | Self::InvalidLength(_)
            | Self::InvalidCloseCode(_) => CloseCode::Protocol,
            Self::InvalidUtf8 | Self::Compression(_) => CloseCode::InvalidData,
            Self::FrameTooLarge { .. } | Self::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            Self::Config(_) => CloseCode::InternalError,
            Self::Io(_) | Self::ConnectionClosed | Self::Timeout(_) => CloseCode::Abnormal,
        }
    }

    /// Check if the rejected frame's payload is still unread, so the next
    /// bytes on the stream are not a frame header.
    #[must_use]
    pub fn leaves_stream_desynced(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. } | Self::InvalidLength(_))
    }
}
