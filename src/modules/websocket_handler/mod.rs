//! # WebSocket Handler Module
//!
//! RFC 6455 WebSocket support layered on the HTTP/1.1 connection loop:
//! handshake validation, the frame codec, and per-path services hosting
//! application behaviors.
//!
//! ## Features
//!
//! - HTTP/1.1 Upgrade validation with RFC 6455 accept keys
//! - Frame reading and writing with masking, fragmentation and reassembly
//! - Ping/pong with optional delivery of Pings to the application
//! - Close handshake with drain timeout and reserved-code checks
//! - Per-message compression (permessage-deflate, no context takeover)
//! - Subprotocol negotiation
//! - Origin and cookie validation
//! - Session registry with broadcast and graceful stop
//!
//! ## Example Configuration
//!
//! ```toml
//! [websocket.protocol]
//! compression = true
//! fragment_size = 1016
//!
//! [websocket.security]
//! allowed_origins = ["https://example.com", "*.example.org"]
//!
//! [websocket.session]
//! wait_time = "60s"
//! drain_timeout = "1s"
//! ```

pub mod behavior;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod manager;
pub mod service;
pub mod session;
pub mod upgrade;

pub use behavior::{BehaviorFactory, SessionSetup, WebSocketBehavior};
pub use codec::{Message, Role};
pub use config::WebSocketConfig;
pub use error::{WebSocketError, WebSocketResult};
pub use frame::{CloseCode, Frame, OpCode};
pub use manager::SessionManager;
pub use service::{normalize_path, PendingSession, WebSocketService};
pub use session::{CloseInfo, SessionHandle, SessionState};
pub use upgrade::{compute_accept_key, HandshakeRejection};
