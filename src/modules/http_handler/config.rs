//! Configuration types for the HTTP handler module.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default server header value.
fn default_server_header() -> String {
    format!("r0n-embed/{}", env!("CARGO_PKG_VERSION"))
}

/// HTTP parsing and response configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound on reading one request head (and its body).
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Maximum size of a request line plus headers.
    pub max_header_size: usize,

    /// Maximum accepted `Content-Length`.
    pub max_body_size: usize,

    /// Whether HTTP/1.1 connections are reused for further requests.
    pub keep_alive: bool,

    /// Value of the `Server` header on every response.
    pub server_header: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(90),
            max_header_size: 8192,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            keep_alive: true,
            server_header: default_server_header(),
        }
    }
}
