//! Accepted connections, their registry, and the per-connection request
//! loop.

use super::context::{HttpContext, ServerContext};
use super::dispatcher::{dispatch, error_page, not_found};
use crate::modules::http_handler::{read_request, HttpMessage};
use crate::modules::websocket_handler::{normalize_path, HandshakeRejection};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Byte stream a connection runs over: plain TCP or TLS.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, not yet read from.
    Accepted = 0,
    /// Reading a request head.
    Reading = 1,
    /// Running handlers.
    Dispatched = 2,
    /// Handed over to a WebSocket session.
    Upgraded = 3,
    /// Tearing down.
    Closing = 4,
    /// Socket dropped.
    Closed = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Accepted,
            1 => Self::Reading,
            2 => Self::Dispatched,
            3 => Self::Upgraded,
            4 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Global connection ID counter.
static CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Metadata of one accepted connection.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    created_at: Instant,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection record. `cancel` force-closes it.
    #[must_use]
    pub fn new(peer_addr: SocketAddr, local_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            id: CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            local_addr,
            created_at: Instant::now(),
            state: AtomicU8::new(ConnectionState::Accepted as u8),
            cancel,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the local address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get connection age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Token that closes this connection when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Force-close the connection.
    pub fn close(&self) {
        self.set_state(ConnectionState::Closing);
        self.cancel.cancel();
    }
}

/// Live connections, for shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<u64, Arc<Connection>>>,
}

/// Unregisters its connection when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    connections: Arc<DashMap<u64, Arc<Connection>>>,
    id: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some((_, connection)) = self.connections.remove(&self.id) {
            connection.set_state(ConnectionState::Closed);
        }
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection until the returned guard is dropped.
    #[must_use]
    pub fn register(&self, connection: Arc<Connection>) -> ConnectionGuard {
        let id = connection.id();
        self.connections.insert(id, connection);
        ConnectionGuard {
            connections: Arc::clone(&self.connections),
            id,
        }
    }

    /// Look up a live connection.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Cancel every live connection. Each task drops its socket as soon as
    /// it observes the cancellation.
    pub fn close_all(&self) -> usize {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }
}

/// Own an accepted socket until it closes.
///
/// The socket is dropped on every exit path: a finished exchange, a read
/// or write error, a handler failure, or cancellation.
pub(crate) async fn serve_connection(
    ctx: Arc<ServerContext>,
    connection: Arc<Connection>,
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
) {
    let cancel = connection.cancel_token().clone();
    let read_timeout = ctx.config().http.read_timeout;

    let transport: Box<dyn Transport> = match tls {
        Some(acceptor) => {
            let accept = tokio::select! {
                () = cancel.cancelled() => return,
                accept = tokio::time::timeout(read_timeout, acceptor.accept(stream)) => accept,
            };
            match accept {
                Ok(Ok(tls_stream)) => Box::new(tls_stream),
                Ok(Err(e)) => {
                    debug!(conn_id = connection.id(), error = %e, "TLS handshake failed");
                    return;
                },
                Err(_) => {
                    debug!(conn_id = connection.id(), "TLS handshake timed out");
                    return;
                },
            }
        },
        None => Box::new(stream),
    };

    exchange(Arc::clone(&ctx), Arc::clone(&connection), BufReader::new(transport)).await;

    connection.set_state(ConnectionState::Closed);
    trace!(
        conn_id = connection.id(),
        age_ms = connection.age().as_millis() as u64,
        "Connection closed"
    );
}

/// Read requests and write responses until the connection should close or
/// it is upgraded.
///
/// Cancellation is observed between requests and while writing; an
/// upgraded session watches the token itself so it can still report its
/// close.
async fn exchange<S>(ctx: Arc<ServerContext>, connection: Arc<Connection>, mut stream: BufReader<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let http_config = &ctx.config().http;
    let cancel = connection.cancel_token().clone();

    loop {
        connection.set_state(ConnectionState::Reading);
        let read = tokio::select! {
            () = cancel.cancelled() => {
                debug!(conn_id = connection.id(), "Connection cancelled");
                return;
            },
            read = read_request(&mut stream, http_config) => read,
        };
        let request = match read {
            Ok(request) => request,
            Err(e) if e.is_disconnect() => {
                trace!(conn_id = connection.id(), error = %e, "Peer went away");
                return;
            },
            Err(e) => {
                debug!(conn_id = connection.id(), error = %e, "Bad request");
                let status = e.status_code();
                let mut response = error_page(status, &e.to_string());
                finish_response(&ctx, &mut response, false);
                let _ = response.write_to(&mut stream).await;
                let _ = stream.shutdown().await;
                return;
            },
        };
        ctx.stats().request();

        if request.headers().contains_token("upgrade", "websocket") {
            upgrade(Arc::clone(&ctx), connection, stream, request).await;
            return;
        }

        connection.set_state(ConnectionState::Dispatched);
        let keep_alive = http_config.keep_alive && request.is_keep_alive();
        let mut http = HttpContext::new(request, connection.peer_addr(), connection.local_addr());

        if !dispatch(&ctx, &mut http) {
            ctx.stats().not_found();
            not_found(&mut http);
        }

        let mut response = http.into_response();
        let is_error = response
            .status()
            .is_some_and(|status| status.is_client_error() || status.is_server_error());
        let keep_alive = keep_alive && !is_error;
        finish_response(&ctx, &mut response, keep_alive);

        let written = tokio::select! {
            () = cancel.cancelled() => return,
            written = response.write_to(&mut stream) => written,
        };
        if let Err(e) = written {
            debug!(conn_id = connection.id(), error = %e, "Failed to write response");
            return;
        }
        if !keep_alive {
            break;
        }
    }

    connection.set_state(ConnectionState::Closing);
    let _ = stream.shutdown().await;
}

/// Run the handshake and, if accepted, hand the stream to the service.
async fn upgrade<S>(
    ctx: Arc<ServerContext>,
    connection: Arc<Connection>,
    mut stream: BufReader<S>,
    request: HttpMessage,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let path = normalize_path(request.path());
    let ws_config = &ctx.config().websocket;

    let outcome = match ctx.service(&path) {
        Some(service) => service
            .handshake(&request, ws_config)
            .map(|pending| (service, pending)),
        None => Err(HandshakeRejection::not_found(&path)),
    };

    let (service, pending) = match outcome {
        Ok(accepted) => accepted,
        Err(rejection) => {
            ctx.stats().rejected_handshake();
            warn!(
                conn_id = connection.id(),
                path = %path,
                status = rejection.status.as_u16(),
                reason = %rejection.reason,
                "WebSocket handshake rejected"
            );
            let mut response = rejection.response();
            finish_response(&ctx, &mut response, false);
            let _ = response.write_to(&mut stream).await;
            let _ = stream.shutdown().await;
            return;
        },
    };

    let mut response = pending.response();
    response
        .headers_mut()
        .insert("Server", ctx.config().http.server_header.clone());
    if let Err(e) = response.write_to(&mut stream).await {
        debug!(conn_id = connection.id(), error = %e, "Failed to write handshake response");
        return;
    }

    ctx.stats().upgrade();
    connection.set_state(ConnectionState::Upgraded);
    service
        .run_session(
            pending,
            stream,
            connection.peer_addr(),
            ws_config,
            connection.cancel_token().clone(),
        )
        .await;
}

/// Add the `Server` and `Connection` headers.
fn finish_response(ctx: &ServerContext, response: &mut HttpMessage, keep_alive: bool) {
    let headers = response.headers_mut();
    headers.insert("Server", ctx.config().http.server_header.clone());
    headers.insert("Connection", if keep_alive { "keep-alive" } else { "close" });
}
