//! # HTTP/1.x Message Handling
//!
//! Parsing and serialization of HTTP/1.0 and HTTP/1.1 messages for the
//! embedded server. A single [`HttpMessage`] type carries both requests
//! and responses; [`read_request`] pulls one off a buffered stream
//! without reading past the end of the message.
//!
//! ## Example
//!
//! ```rust,ignore
//! use r0n_embed::modules::http_handler::{read_request, HttpConfig};
//!
//! let request = read_request(&mut reader, &HttpConfig::default()).await?;
//! println!("{} {}", request.method().unwrap(), request.path());
//! ```

pub mod body;
pub mod config;
pub mod error;
pub mod headers;
pub mod message;
pub mod reader;

pub use body::Body;
pub use config::HttpConfig;
pub use error::{HttpError, HttpResult};
pub use headers::Headers;
pub use message::{Direction, HttpMessage, StartLine};
pub use reader::{read_request, read_response};
