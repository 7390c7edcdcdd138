//! # Embedded Web Server
//!
//! Owns the listening socket and the per-connection tasks. Plain HTTP
//! requests go through the module dispatcher; upgrade requests are handed
//! to the WebSocket service registered on their path.
//!
//! ## Features
//!
//! - One task per accepted connection, never serialized across connections
//! - Optional TLS via `tokio-rustls`
//! - HTTP/1.1 keep-alive
//! - Graceful stop (close handshakes first) and immediate abort
//! - Atomic counters for connections, requests and upgrades
//!
//! ## Example
//!
//! ```ignore
//! let server = WebServer::new(ServerConfig::default());
//! server.add_service("/echo", || Echo)?;
//! let addr = server.start().await?;
//! // ...
//! server.stop().await;
//! ```

mod connection;
mod context;
mod dispatcher;
mod error;
mod listener;
mod stats;

pub use connection::{Connection, ConnectionGuard, ConnectionRegistry, ConnectionState, Transport};
pub use context::{HttpContext, Middleware, ServerContext};
pub use dispatcher::{dispatch, error_page, failure_page, not_found};
pub use error::{ServerError, ServerResult};
pub use listener::{ListenerState, ACCEPT_ERROR_DELAY};
pub use stats::{ServerStats, StatsSnapshot};

use crate::config::{BasicValidator, ConfigLoader, ServerConfig};
use crate::module::{HandlerResult, WebModule};
use crate::modules::websocket_handler::{CloseCode, WebSocketBehavior, WebSocketService};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATE_STOPPED: u8 = 0;
const STATE_LISTENING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Poll interval while waiting for sessions to finish their close
/// handshakes.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// An embeddable HTTP and WebSocket server.
pub struct WebServer {
    ctx: Arc<ServerContext>,
    tls: Option<TlsAcceptor>,
    state: AtomicU8,
    local_addr: OnceLock<SocketAddr>,
    accept_stop: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WebServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("tls", &self.tls.is_some())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl WebServer {
    /// Create a stopped server.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let ctx = Arc::new(ServerContext::new(config));
        let accept_stop = ctx.cancel_token().child_token();
        Self {
            ctx,
            tls: None,
            state: AtomicU8::new(STATE_STOPPED),
            local_addr: OnceLock::new(),
            accept_stop,
            accept_task: Mutex::new(None),
        }
    }

    /// Wrap every accepted socket in TLS before reading from it.
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Run `middleware` before module dispatch. Returning `Ok(true)` marks
    /// the request handled and skips the modules.
    #[must_use]
    pub fn with_middleware<F>(self, middleware: F) -> Self
    where
        F: Fn(&ServerContext, &mut HttpContext) -> HandlerResult<bool> + Send + Sync + 'static,
    {
        self.ctx.add_middleware(Arc::new(middleware));
        self
    }

    /// Register a module. Returns `false` (with a warning) if a module of
    /// the same type is already registered.
    pub fn register_module<M: WebModule>(&self, module: M) -> bool {
        self.ctx.modules().register(module)
    }

    /// Unregister the module of type `M`. Returns `false` (with a warning)
    /// if there is none.
    pub fn unregister_module<M: WebModule>(&self) -> bool {
        self.ctx.modules().unregister::<M>()
    }

    /// Host a WebSocket service on `path`, creating a fresh behavior from
    /// `factory` for each accepted upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Service`] for an invalid path and
    /// [`ServerError::DuplicateService`] if the path is taken.
    pub fn add_service<F, B>(&self, path: &str, factory: F) -> ServerResult<()>
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: WebSocketBehavior,
    {
        let service = WebSocketService::new(path, factory, &self.ctx.config().websocket)?;
        let path = service.path().to_string();
        if !self.ctx.insert_service(service) {
            return Err(ServerError::DuplicateService(path));
        }
        info!(path = %path, "WebSocket service added");
        Ok(())
    }

    /// Bind the listener and start accepting connections.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if already started
    /// - [`ServerError::Closed`] after [`stop`](Self::stop) or [`abort`](Self::abort)
    /// - [`ServerError::Config`] if the configuration is invalid
    /// - [`ServerError::Bind`] if the socket can't be bound
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        if let Err(current) = self.state.compare_exchange(
            STATE_STOPPED,
            STATE_LISTENING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(if current == STATE_LISTENING {
                ServerError::AlreadyRunning
            } else {
                ServerError::Closed
            });
        }

        match self.bind().await {
            Ok(addr) => Ok(addr),
            Err(e) => {
                self.state.store(STATE_STOPPED, Ordering::Release);
                Err(e)
            },
        }
    }

    async fn bind(&self) -> ServerResult<SocketAddr> {
        ConfigLoader::new()
            .with_validator(BasicValidator::new())
            .validate(self.ctx.config())?;

        let address = self.ctx.config().listener.socket_addr();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Bind { address, source: e })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind { address, source: e })?;
        let _ = self.local_addr.set(local_addr);

        let task = tokio::spawn(listener::accept_loop(
            listener,
            Arc::clone(&self.ctx),
            self.tls.clone(),
            self.accept_stop.clone(),
        ));
        *self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!(address = %local_addr, "Web server listening");
        Ok(local_addr)
    }

    /// Stop gracefully: stop accepting, close every WebSocket session with
    /// 1001 and wait up to the drain timeout for the close handshakes, then
    /// force-close whatever is left.
    pub async fn stop(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return;
        }
        info!("Stopping web server");
        self.accept_stop.cancel();

        let services = self.ctx.services();
        for service in &services {
            service
                .sessions()
                .stop(CloseCode::GoingAway, "Server is shutting down");
        }

        let deadline = Instant::now() + self.ctx.config().websocket.session.drain_timeout;
        while services.iter().any(|service| service.sessions().count() > 0) {
            if Instant::now() >= deadline {
                warn!("Sessions still open after drain timeout");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        self.shutdown().await;
        info!("Web server stopped");
    }

    /// Stop immediately, dropping every connection without a close
    /// handshake.
    pub fn abort(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.ctx.cancel_token().cancel();
        let closed = self.ctx.connections().close_all();
        if let Some(task) = self.take_accept_task() {
            task.abort();
        }
        warn!(connections = closed, "Web server aborted");
    }

    async fn shutdown(&self) {
        self.ctx.cancel_token().cancel();
        let closed = self.ctx.connections().close_all();
        debug!(connections = closed, "Closed remaining connections");

        if let Some(task) = self.take_accept_task() {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop task failed");
            }
        }
    }

    fn take_accept_task(&self) -> Option<JoinHandle<()>> {
        self.accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Current listener state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        match self.state.load(Ordering::Acquire) {
            STATE_STOPPED => ListenerState::Stopped,
            STATE_LISTENING => ListenerState::Listening,
            _ => ListenerState::Closed,
        }
    }

    /// Bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Shared server context.
    #[must_use]
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        self.ctx.cancel_token().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::modules::websocket_handler::{Message, SessionHandle};

    struct Silent;

    impl WebSocketBehavior for Silent {
        fn on_message(&mut self, _session: &SessionHandle, _message: Message) {}
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            listener: ListenerConfig::localhost(0),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_twice() {
        let server = WebServer::new(local_config());
        assert_eq!(server.state(), ListenerState::Stopped);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(server.state(), ListenerState::Listening);
        assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));

        server.stop().await;
        assert_eq!(server.state(), ListenerState::Closed);
        assert!(matches!(server.start().await, Err(ServerError::Closed)));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = WebServer::new(ServerConfig {
            listener: ListenerConfig::localhost(port),
            ..ServerConfig::default()
        });
        assert!(matches!(server.start().await, Err(ServerError::Bind { .. })));
        assert_eq!(server.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let mut config = local_config();
        config.websocket.protocol.fragment_size = 0;
        let server = WebServer::new(config);
        assert!(matches!(server.start().await, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_add_service_rules() {
        let server = WebServer::new(local_config());
        assert!(server.add_service("/chat", || Silent).is_ok());
        assert!(matches!(
            server.add_service("/chat/", || Silent),
            Err(ServerError::DuplicateService(_))
        ));
        assert!(matches!(
            server.add_service("chat", || Silent),
            Err(ServerError::Service(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_cancels_context() {
        let server = WebServer::new(local_config());
        server.start().await.unwrap();
        server.abort();

        assert_eq!(server.state(), ListenerState::Closed);
        assert!(server.context().cancel_token().is_cancelled());
    }
}
