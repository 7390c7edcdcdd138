//! WebSocket server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket configuration shared by every service on a server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Protocol settings.
    pub protocol: ProtocolConfig,

    /// Security settings.
    pub security: SecurityConfig,

    /// Resource limits.
    pub limits: LimitsConfig,

    /// Session timing.
    pub session: SessionConfig,
}

/// Protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Allow `permessage-deflate` when a behavior opts in.
    pub compression: bool,

    /// Deliver received Pings to behaviors instead of only auto-replying.
    pub emit_on_ping: bool,

    /// Largest payload put in one outgoing data frame.
    pub fragment_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            compression: false,
            emit_on_ping: false,
            fragment_size: 1016,
        }
    }
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Allowed origins (empty = all allowed).
    pub allowed_origins: Vec<String>,

    /// Whether to check that `Sec-WebSocket-Key` decodes to 16 bytes.
    pub validate_key: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            validate_key: true,
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum frame payload size.
    pub max_frame_size: usize,

    /// Maximum message size (across multiple frames).
    pub max_message_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle timeout while waiting for the next frame.
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,

    /// How long to wait for the peer's Close after sending ours.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(1),
        }
    }
}
