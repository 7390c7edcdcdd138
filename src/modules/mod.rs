//! # Protocol Modules
//!
//! Wire-level protocol support used by the server.
//!
//! ## Available Modules
//!
//! - [`http_handler`] - HTTP/1.x message model, parser and writer
//! - [`websocket_handler`] - WebSocket handshake, frame codec and session hosting

pub mod http_handler;
pub mod websocket_handler;
