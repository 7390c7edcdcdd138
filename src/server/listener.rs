//! TCP accept loop.

use super::connection::{serve_connection, Connection};
use super::context::ServerContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again.
pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(10);

/// Lifecycle of the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not started yet.
    Stopped,
    /// Accepting connections.
    Listening,
    /// Stopped or aborted; cannot be restarted.
    Closed,
}

/// Accept connections until `stop` is cancelled, spawning one task per
/// connection. Accept errors are logged and never end the loop.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tls: Option<TlsAcceptor>,
    stop: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, tls = tls.is_some(), "Accept loop started");
    }

    loop {
        let accepted = tokio::select! {
            () = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.stats().accept_error();
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                continue;
            },
        };

        if let Err(e) = configure_stream(&stream) {
            warn!(peer = %peer_addr, error = %e, "Failed to configure stream");
        }
        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                ctx.stats().accept_error();
                warn!(peer = %peer_addr, error = %e, "Accepted socket has no local address");
                continue;
            },
        };

        let connection = Arc::new(Connection::new(
            peer_addr,
            local_addr,
            ctx.cancel_token().child_token(),
        ));
        let guard = ctx.connections().register(Arc::clone(&connection));
        ctx.stats().connection_opened();
        debug!(peer = %peer_addr, conn_id = connection.id(), "Accepted connection");

        let ctx = Arc::clone(&ctx);
        let tls = tls.clone();
        tokio::spawn(async move {
            let _guard = guard;
            serve_connection(Arc::clone(&ctx), connection, stream, tls).await;
            ctx.stats().connection_closed();
        });
    }

    info!("Accept loop stopped");
}

fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)
}
