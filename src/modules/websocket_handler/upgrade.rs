//! WebSocket HTTP upgrade handling.
//!
//! Implements the server side of the RFC 6455 opening handshake.

use crate::modules::http_handler::HttpMessage;
use base64::Engine;
use http::{Method, StatusCode, Version};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// WebSocket magic GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version the server speaks.
pub const SUPPORTED_VERSION: &str = "13";

/// Name of the per-message compression extension.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Extension parameters the server answers with.
const DEFLATE_RESPONSE: &str =
    "permessage-deflate; server_no_context_takeover; client_no_context_takeover";

/// Rejection text for a failed origin check.
pub const ORIGIN_REJECTED: &str = "Includes no Origin header, or it has an invalid value.";

/// Rejection text for a failed cookie check.
pub const COOKIES_REJECTED: &str = "Includes no cookie, or an invalid cookie exists.";

/// Decides whether the request's `Origin` header value is acceptable.
pub type OriginValidator = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Decides whether the request's `Cookie` header value is acceptable.
pub type CookieValidator = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Progress of one opening handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No request seen yet.
    AwaitingRequest,
    /// Checking the request headers.
    ValidatingHeaders,
    /// Headers are valid; deriving the accept key.
    ComputingAccept,
    /// The upgrade succeeded.
    Accepted,
    /// The upgrade was refused.
    Rejected,
}

/// What the server will accept during a handshake.
#[derive(Clone, Default)]
pub struct HandshakeOptions {
    /// Allowed origins (empty = all allowed). Ignored when an origin
    /// validator is set.
    pub allowed_origins: Vec<String>,
    /// Check that the key decodes to 16 bytes.
    pub validate_key: bool,
    /// Subprotocol offered by the service, echoed when the client asks for it.
    pub protocol: Option<String>,
    /// Negotiate `permessage-deflate` if the client offers it.
    pub compression: bool,
    /// Custom origin check.
    pub origin_validator: Option<OriginValidator>,
    /// Custom cookie check.
    pub cookie_validator: Option<CookieValidator>,
}

impl fmt::Debug for HandshakeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeOptions")
            .field("allowed_origins", &self.allowed_origins)
            .field("validate_key", &self.validate_key)
            .field("protocol", &self.protocol)
            .field("compression", &self.compression)
            .field("origin_validator", &self.origin_validator.is_some())
            .field("cookie_validator", &self.cookie_validator.is_some())
            .finish()
    }
}

/// A handshake that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedHandshake {
    /// The client's `Sec-WebSocket-Key`.
    pub key: String,
    /// The computed `Sec-WebSocket-Accept`.
    pub accept: String,
    /// Negotiated subprotocol.
    pub protocol: Option<String>,
    /// Whether `permessage-deflate` was negotiated.
    pub compression: bool,
}

impl AcceptedHandshake {
    /// The `101 Switching Protocols` response for this handshake.
    #[must_use]
    pub fn response(&self) -> HttpMessage {
        let mut builder = UpgradeResponse::new();
        if let Some(protocol) = &self.protocol {
            builder = builder.protocol(protocol.clone());
        }
        if self.compression {
            builder = builder.extension(DEFLATE_RESPONSE);
        }
        builder.build(&self.key)
    }
}

/// A refused handshake. The connection is closed after the response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {reason}")]
pub struct HandshakeRejection {
    /// Response status.
    pub status: StatusCode,
    /// Human-readable reason, sent as the body.
    pub reason: String,
}

impl HandshakeRejection {
    /// Create a rejection.
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// Rejection for a path with no registered service.
    pub fn not_found(path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("No WebSocket service at {path}"),
        )
    }

    /// The error response for this rejection.
    #[must_use]
    pub fn response(&self) -> HttpMessage {
        let mut response = HttpMessage::response(self.status);
        let headers = response.headers_mut();
        headers.insert("Content-Type", "text/plain; charset=utf-8");
        headers.insert("Connection", "close");
        if self.status == StatusCode::UPGRADE_REQUIRED {
            headers.insert("Sec-WebSocket-Version", SUPPORTED_VERSION);
        }
        response.set_body(self.reason.clone());
        response
    }
}

/// Server-side opening handshake.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Start a handshake.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingRequest,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Validate an upgrade request, failing on the first violation.
    ///
    /// Checks run in this order: method and version, `Upgrade` and
    /// `Connection`, the key, `Sec-WebSocket-Version`, then the origin and
    /// cookie validators.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeRejection`] carrying 400 for a malformed request,
    /// 426 for an unsupported version and 403 when a validator refuses.
    pub fn validate(
        &mut self,
        request: &HttpMessage,
        options: &HandshakeOptions,
    ) -> Result<AcceptedHandshake, HandshakeRejection> {
        self.state = HandshakeState::ValidatingHeaders;
        match self.check(request, options) {
            Ok(accepted) => {
                self.state = HandshakeState::Accepted;
                Ok(accepted)
            },
            Err(rejection) => {
                debug!(status = %rejection.status, reason = %rejection.reason, "Handshake rejected");
                self.state = HandshakeState::Rejected;
                Err(rejection)
            },
        }
    }

    fn check(
        &mut self,
        request: &HttpMessage,
        options: &HandshakeOptions,
    ) -> Result<AcceptedHandshake, HandshakeRejection> {
        let headers = request.headers();
        let bad = |reason: &str| HandshakeRejection::new(StatusCode::BAD_REQUEST, reason);

        if request.method() != Some(&Method::GET) {
            return Err(bad("The method of the request is not GET."));
        }
        if request.version() < Version::HTTP_11 {
            return Err(bad("The HTTP version of the request is lower than 1.1."));
        }

        if !headers.contains_token("upgrade", "websocket") {
            return Err(bad("Includes no Upgrade header, or it has an invalid value."));
        }
        if !headers.contains_token("connection", "upgrade") {
            return Err(bad("Includes no Connection header, or it has an invalid value."));
        }

        let key = headers
            .get("sec-websocket-key")
            .map(str::trim)
            .filter(|key| !key.is_empty() && (!options.validate_key || is_valid_key(key)))
            .ok_or_else(|| bad("Includes no Sec-WebSocket-Key header, or it has an invalid value."))?;

        if headers.get("sec-websocket-version").map(str::trim) != Some(SUPPORTED_VERSION) {
            return Err(HandshakeRejection::new(
                StatusCode::UPGRADE_REQUIRED,
                "Includes no Sec-WebSocket-Version header, or it has an invalid value.",
            ));
        }

        let origin = headers.get("origin");
        let origin_ok = match &options.origin_validator {
            Some(validator) => validator(origin),
            None => check_origin(origin, &options.allowed_origins),
        };
        if !origin_ok {
            return Err(HandshakeRejection::new(StatusCode::FORBIDDEN, ORIGIN_REJECTED));
        }

        if let Some(validator) = &options.cookie_validator {
            if !validator(headers.get("cookie")) {
                return Err(HandshakeRejection::new(StatusCode::FORBIDDEN, COOKIES_REJECTED));
            }
        }

        self.state = HandshakeState::ComputingAccept;

        let requested: Vec<String> = headers
            .get_all("sec-websocket-protocol")
            .flat_map(|v| v.split(','))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let protocol = options
            .protocol
            .as_ref()
            .and_then(|p| negotiate_protocol(&requested, std::slice::from_ref(p)));

        let compression = options.compression
            && headers
                .get_all("sec-websocket-extensions")
                .flat_map(|v| v.split(','))
                .any(|ext| {
                    ext.split(';')
                        .next()
                        .is_some_and(|name| name.trim().eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
                });

        Ok(AcceptedHandshake {
            key: key.to_string(),
            accept: compute_accept_key(key),
            protocol,
            compression,
        })
    }
}

fn is_valid_key(key: &str) -> bool {
    base64::engine::general_purpose::STANDARD
        .decode(key)
        .is_ok_and(|decoded| decoded.len() == 16)
}

/// WebSocket upgrade response builder.
#[derive(Debug, Default)]
pub struct UpgradeResponse {
    protocol: Option<String>,
    extensions: Vec<String>,
    headers: Vec<(String, String)>,
}

impl UpgradeResponse {
    /// Create a new response builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the selected subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Add an accepted extension.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Add a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the `101 Switching Protocols` response.
    #[must_use]
    pub fn build(&self, key: &str) -> HttpMessage {
        let mut response = HttpMessage::response(StatusCode::SWITCHING_PROTOCOLS);
        let headers = response.headers_mut();
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Accept", compute_accept_key(key));

        if let Some(protocol) = &self.protocol {
            headers.append("Sec-WebSocket-Protocol", protocol.clone());
        }
        if !self.extensions.is_empty() {
            headers.append("Sec-WebSocket-Extensions", self.extensions.join(", "));
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        response
    }
}

/// Compute Sec-WebSocket-Accept value from client key.
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Negotiate subprotocol from client request and server supported list.
#[must_use]
pub fn negotiate_protocol(requested: &[String], supported: &[String]) -> Option<String> {
    requested
        .iter()
        .find(|req| supported.iter().any(|s| s.eq_ignore_ascii_case(req)))
        .cloned()
}

/// Check if origin is allowed.
///
/// `*` allows everything; `*.example.com` allows the domain and any
/// subdomain of it.
#[must_use]
pub fn check_origin(origin: Option<&str>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    match origin {
        Some(origin) => allowed.iter().any(|a| {
            if a == "*" {
                true
            } else if let Some(domain) = a.strip_prefix("*.") {
                origin.ends_with(&a[1..]) || origin == domain
            } else {
                a == origin
            }
        }),
        None => false,
    }
}
