//! Live WebSocket sessions and their outgoing queue.
//!
//! Every session owns one writer task. All sends go through an unbounded
//! queue that only that task drains, so frames of one message are never
//! interleaved with another sender's frames.

use super::codec::{encode_message, EncodeOptions, Message};
use super::error::{WebSocketError, WebSocketResult};
use super::frame::{CloseCode, Frame};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Handshake done, not yet registered.
    Connecting = 0,
    /// Exchanging messages.
    Open = 1,
    /// A Close frame was sent; waiting for the peer's.
    Closing = 2,
    /// Finished.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close status. [`CloseCode::Abnormal`] when no Close frame was exchanged.
    pub code: CloseCode,
    /// Close reason.
    pub reason: String,
    /// `true` if the closing handshake completed.
    pub was_clean: bool,
}

impl CloseInfo {
    /// A close that completed the handshake.
    pub fn clean(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
        }
    }

    /// A close without a completed handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CloseCode::Abnormal,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Items consumed by the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Frames of one message, written back to back.
    Frames(Vec<Frame>),
    /// Flush what is queued and shut the write side down.
    Finish,
}

struct SessionInner {
    id: OnceLock<String>,
    state: AtomicU8,
    protocol: Option<String>,
    path: String,
    start_time: DateTime<Utc>,
    remote_addr: SocketAddr,
    encode: EncodeOptions,
    close_sent: Mutex<Option<(CloseCode, String)>>,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Cloneable handle to a session.
///
/// Sends never block: they enqueue frames for the session's writer task
/// and fail with [`WebSocketError::ConnectionClosed`] once the session is
/// no longer open.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("path", &self.inner.path)
            .field("remote_addr", &self.inner.remote_addr)
            .finish()
    }
}

impl SessionHandle {
    /// Create a handle in the [`SessionState::Connecting`] state together
    /// with the receiving end of its queue.
    pub(crate) fn new(
        path: impl Into<String>,
        remote_addr: SocketAddr,
        protocol: Option<String>,
        encode: EncodeOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            id: OnceLock::new(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            protocol,
            path: path.into(),
            start_time: Utc::now(),
            remote_addr,
            encode,
            close_sent: Mutex::new(None),
            tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Session id, empty until the session is registered.
    #[must_use]
    pub fn id(&self) -> &str {
        self.inner.id.get().map_or("", String::as_str)
    }

    pub(crate) fn assign_id(&self, id: String) -> bool {
        self.inner.id.set(id).is_ok()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Negotiated subprotocol.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.inner.protocol.as_deref()
    }

    /// Service path the session was accepted on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// When the handshake completed.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Fails with [`WebSocketError::ConnectionClosed`] unless the session is open.
    pub fn send_text(&self, text: impl Into<String>) -> WebSocketResult<()> {
        self.send(&Message::Text(text.into()))
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Fails with [`WebSocketError::ConnectionClosed`] unless the session is open.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> WebSocketResult<()> {
        self.send(&Message::Binary(data.into()))
    }

    /// Send a Ping.
    ///
    /// # Errors
    ///
    /// Fails if the session is not open or the payload is over 125 bytes.
    pub fn ping(&self, payload: impl Into<Bytes>) -> WebSocketResult<()> {
        self.send(&Message::Ping(payload.into()))
    }

    /// Send a data or control message.
    ///
    /// Close messages go through [`close`](Self::close) semantics.
    ///
    /// # Errors
    ///
    /// Fails if the session is not open or the message can't be encoded.
    pub fn send(&self, message: &Message) -> WebSocketResult<()> {
        if let Message::Close { code, reason } = message {
            return self.close(*code, reason);
        }
        if self.state() != SessionState::Open {
            return Err(WebSocketError::ConnectionClosed);
        }
        let frames = encode_message(message, &self.inner.encode)?;
        self.enqueue(Outbound::Frames(frames))
    }

    /// Start the closing handshake.
    ///
    /// Only the first call sends a Close frame; later calls succeed without
    /// effect.
    ///
    /// # Errors
    ///
    /// Fails for a reserved close code or a reason too long for a control
    /// frame.
    pub fn close(&self, code: CloseCode, reason: &str) -> WebSocketResult<()> {
        let frame = Frame::close(code, reason)?;
        if !self.begin_closing() {
            return Ok(());
        }
        if let Ok(mut sent) = self.inner.close_sent.lock() {
            *sent = Some((code, reason.to_string()));
        }
        debug!(session = %self.id(), code = %code, "Closing session");
        // Writer may already be gone; the reader notices on its own.
        let _ = self.enqueue(Outbound::Frames(vec![frame]));
        Ok(())
    }

    /// Close because of an error, using the standard reason text.
    pub(crate) fn fail(&self, code: CloseCode) {
        let code = if code.is_valid_on_wire() {
            code
        } else {
            CloseCode::InternalError
        };
        let _ = self.close(code, code.reason_text());
    }

    /// Answer a peer-initiated Close by echoing its status.
    pub(crate) fn echo_close(&self, code: CloseCode) {
        if !self.begin_closing() {
            return;
        }
        let code = if code.is_valid_on_wire() {
            code
        } else {
            CloseCode::NoStatus
        };
        if let Ok(frame) = Frame::close(code, "") {
            let _ = self.enqueue(Outbound::Frames(vec![frame]));
        }
    }

    pub(crate) fn pong(&self, payload: Bytes) {
        if self.state() != SessionState::Open {
            return;
        }
        if let Ok(frame) = Frame::pong(payload) {
            let _ = self.enqueue(Outbound::Frames(vec![frame]));
        }
    }

    /// Status and reason of the Close frame this side sent, if any.
    pub(crate) fn close_sent(&self) -> Option<(CloseCode, String)> {
        self.inner.close_sent.lock().ok().and_then(|sent| sent.clone())
    }

    pub(crate) fn finish(&self) {
        let _ = self.inner.tx.send(Outbound::Finish);
    }

    fn begin_closing(&self) -> bool {
        let from_open = self.inner.state.compare_exchange(
            SessionState::Open as u8,
            SessionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if from_open.is_ok() {
            return true;
        }
        self.inner
            .state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn enqueue(&self, item: Outbound) -> WebSocketResult<()> {
        self.inner
            .tx
            .send(item)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }
}

/// Drain the session queue into `writer` until told to finish, the
/// connection is cancelled, or a write fails.
pub(crate) async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) -> WebSocketResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = rx.recv() => next,
        };

        match next {
            Some(Outbound::Frames(frames)) => {
                buf.clear();
                for frame in &frames {
                    frame.encode_into(&mut buf);
                }
                trace!(frames = frames.len(), bytes = buf.len(), "Writing frames");
                writer.write_all(&buf).await?;
                writer.flush().await?;
            },
            Some(Outbound::Finish) | None => break,
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}
