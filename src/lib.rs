//! # R0N Embed
//!
//! A small embeddable HTTP/1.1 server with RFC 6455 WebSocket support,
//! built on Tokio.
//!
//! ## Features
//!
//! - Module-based HTTP dispatch with `(path, verb)` handler tables
//! - Escaped 500 pages for failing handlers, 404 for unhandled requests
//! - WebSocket services per path with pluggable behaviors
//! - Per-message compression, fragmentation, ping/pong and close handshakes
//! - Graceful shutdown through a process-wide cancellation token
//!
//! ## Architecture
//!
//! A [`server::WebServer`] accepts connections and runs one task per
//! connection. Requests are parsed by [`modules::http_handler`] and either
//! dispatched through the registered [`module::WebModule`]s or, for
//! upgrade requests, handed to a
//! [`modules::websocket_handler::WebSocketService`].

pub mod config;
pub mod module;
pub mod modules;
pub mod server;
pub mod util;
