//! Shared server state and the per-request context handed to handlers.

use super::connection::ConnectionRegistry;
use super::stats::ServerStats;
use crate::config::ServerConfig;
use crate::module::{HandlerResult, ModuleRegistry};
use crate::modules::http_handler::HttpMessage;
use crate::modules::websocket_handler::WebSocketService;
use crate::util::correlation_id;
use dashmap::DashMap;
use http::{Method, StatusCode};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Callback run before module dispatch. Returning `Ok(true)` skips the
/// modules.
pub type Middleware =
    Arc<dyn Fn(&ServerContext, &mut HttpContext) -> HandlerResult<bool> + Send + Sync>;

/// State shared by the accept loop, every connection task and every
/// handler.
pub struct ServerContext {
    config: ServerConfig,
    modules: ModuleRegistry,
    services: DashMap<String, Arc<WebSocketService>>,
    middleware: RwLock<Vec<Middleware>>,
    connections: ConnectionRegistry,
    stats: ServerStats,
    cancel: CancellationToken,
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("modules", &self.modules)
            .field("services", &self.service_paths())
            .field("connections", &self.connections.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Create a context for `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            modules: ModuleRegistry::new(),
            services: DashMap::new(),
            middleware: RwLock::new(Vec::new()),
            connections: ConnectionRegistry::new(),
            stats: ServerStats::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registered modules.
    #[must_use]
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// The WebSocket service registered on a normalized path.
    #[must_use]
    pub fn service(&self, path: &str) -> Option<Arc<WebSocketService>> {
        self.services.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Every registered WebSocket service.
    #[must_use]
    pub fn services(&self) -> Vec<Arc<WebSocketService>> {
        self.services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Paths with a WebSocket service.
    #[must_use]
    pub fn service_paths(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Register a service. Returns `false` if its path is taken.
    pub(crate) fn insert_service(&self, service: WebSocketService) -> bool {
        match self.services.entry(service.path().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(service));
                true
            },
        }
    }

    pub(crate) fn add_middleware(&self, middleware: Middleware) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    /// Installed middleware, in installation order.
    #[must_use]
    pub fn middleware(&self) -> Vec<Middleware> {
        self.middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Live connections.
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Server counters.
    #[must_use]
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Process-wide shutdown token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One HTTP exchange as seen by handlers.
///
/// Handlers read the request and fill in the response; the connection
/// writes the response once dispatch returns.
#[derive(Debug)]
pub struct HttpContext {
    request: HttpMessage,
    response: HttpMessage,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    correlation_id: String,
}

impl HttpContext {
    /// Wrap a request. The response starts as an empty `200 OK`.
    #[must_use]
    pub fn new(request: HttpMessage, remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos() as i64);
        Self {
            request,
            response: HttpMessage::response(StatusCode::OK),
            remote_addr,
            local_addr,
            correlation_id: correlation_id(nanos, &remote_addr.to_string()),
        }
    }

    /// The request.
    #[must_use]
    pub fn request(&self) -> &HttpMessage {
        &self.request
    }

    /// The request, mutably (to take its body).
    pub fn request_mut(&mut self) -> &mut HttpMessage {
        &mut self.request
    }

    /// Request method. Parsed requests always carry one.
    #[must_use]
    pub fn method(&self) -> Method {
        self.request.method().cloned().unwrap_or(Method::GET)
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// The response being built.
    #[must_use]
    pub fn response(&self) -> &HttpMessage {
        &self.response
    }

    /// The response being built, mutably.
    pub fn response_mut(&mut self) -> &mut HttpMessage {
        &mut self.response
    }

    /// Consume the context, keeping the response.
    #[must_use]
    pub fn into_response(self) -> HttpMessage {
        self.response
    }

    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address the request arrived on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Diagnostic id logged with this request.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Set the status and a plain-text body.
    pub fn respond_text(&mut self, status: StatusCode, text: impl Into<String>) {
        self.respond(status, "text/plain; charset=utf-8", text.into());
    }

    /// Set the status and an HTML body.
    pub fn respond_html(&mut self, status: StatusCode, html: impl Into<String>) {
        self.respond(status, "text/html; charset=utf-8", html.into());
    }

    fn respond(&mut self, status: StatusCode, content_type: &str, body: String) {
        self.response.set_status(status);
        self.response
            .headers_mut()
            .insert("Content-Type", content_type);
        self.response.set_body(body.into_bytes());
    }
}
