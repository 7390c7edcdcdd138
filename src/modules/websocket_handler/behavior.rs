//! Application callbacks for WebSocket sessions.

use super::codec::Message;
use super::config::WebSocketConfig;
use super::error::{WebSocketError, WebSocketResult};
use super::session::{CloseInfo, SessionHandle};
use super::upgrade::{CookieValidator, HandshakeOptions, OriginValidator};
use crate::util::is_token;
use std::fmt;
use std::sync::Arc;

/// Callbacks driven by a WebSocket session.
///
/// One instance serves exactly one session. Callbacks run on the session's
/// reader task in frame arrival order, so they must not block; sends
/// through the [`SessionHandle`] only enqueue.
pub trait WebSocketBehavior: Send + 'static {
    /// Called before the handshake response is written. The only place the
    /// subprotocol and other session options can be set.
    fn on_connecting(&mut self, _setup: &mut SessionSetup) {}

    /// Called once the session is registered and open.
    fn on_open(&mut self, _session: &SessionHandle) {}

    /// Called for every complete text or binary message, and for Pings when
    /// [`SessionSetup::set_emit_on_ping`] is on.
    fn on_message(&mut self, session: &SessionHandle, message: Message);

    /// Called when the session fails.
    fn on_error(&mut self, _session: &SessionHandle, _error: &WebSocketError) {}

    /// Called exactly once when the session ends.
    fn on_close(&mut self, _session: &SessionHandle, _info: &CloseInfo) {}
}

/// Creates a fresh behavior for each accepted upgrade.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn WebSocketBehavior> + Send + Sync>;

/// Per-session options, settable only while connecting.
#[derive(Clone)]
pub struct SessionSetup {
    protocol: Option<String>,
    emit_on_ping: bool,
    ignore_extensions: bool,
    origin_validator: Option<OriginValidator>,
    cookie_validator: Option<CookieValidator>,
}

impl Default for SessionSetup {
    fn default() -> Self {
        Self {
            protocol: None,
            emit_on_ping: false,
            ignore_extensions: true,
            origin_validator: None,
            cookie_validator: None,
        }
    }
}

impl fmt::Debug for SessionSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSetup")
            .field("protocol", &self.protocol)
            .field("emit_on_ping", &self.emit_on_ping)
            .field("ignore_extensions", &self.ignore_extensions)
            .finish_non_exhaustive()
    }
}

impl SessionSetup {
    /// Options seeded from the server configuration.
    #[must_use]
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            emit_on_ping: config.protocol.emit_on_ping,
            ..Self::default()
        }
    }

    /// Subprotocol to accept.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Set the subprotocol to accept if the client offers it.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::Config`] if the name is not an HTTP token.
    pub fn set_protocol(&mut self, protocol: impl Into<String>) -> WebSocketResult<()> {
        let protocol = protocol.into();
        if !is_token(&protocol) {
            return Err(WebSocketError::Config(format!(
                "Protocol is not a token: {protocol:?}"
            )));
        }
        self.protocol = Some(protocol);
        Ok(())
    }

    /// Whether Pings reach [`WebSocketBehavior::on_message`].
    #[must_use]
    pub fn emit_on_ping(&self) -> bool {
        self.emit_on_ping
    }

    /// Deliver Pings to the behavior instead of answering them.
    pub fn set_emit_on_ping(&mut self, emit: bool) {
        self.emit_on_ping = emit;
    }

    /// Whether extension offers are ignored.
    #[must_use]
    pub fn ignore_extensions(&self) -> bool {
        self.ignore_extensions
    }

    /// Allow (`false`) or refuse (`true`) extension negotiation.
    pub fn set_ignore_extensions(&mut self, ignore: bool) {
        self.ignore_extensions = ignore;
    }

    /// Install an origin check.
    pub fn set_origin_validator<F>(&mut self, validator: F)
    where
        F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.origin_validator = Some(Arc::new(validator));
    }

    /// Install a cookie check. It receives the raw `Cookie` header.
    pub fn set_cookie_validator<F>(&mut self, validator: F)
    where
        F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.cookie_validator = Some(Arc::new(validator));
    }

    /// Combine these options with the server configuration.
    #[must_use]
    pub fn handshake_options(&self, config: &WebSocketConfig) -> HandshakeOptions {
        HandshakeOptions {
            allowed_origins: config.security.allowed_origins.clone(),
            validate_key: config.security.validate_key,
            protocol: self.protocol.clone(),
            compression: config.protocol.compression && !self.ignore_extensions,
            origin_validator: self.origin_validator.clone(),
            cookie_validator: self.cookie_validator.clone(),
        }
    }
}
