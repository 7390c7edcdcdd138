//! WebSocket service host: one path, one behavior factory, one session
//! manager.

use super::behavior::{BehaviorFactory, SessionSetup, WebSocketBehavior};
use super::codec::{read_frame, EncodeOptions, FrameLimits, Message, MessageAssembler, Role};
use super::config::WebSocketConfig;
use super::error::{WebSocketError, WebSocketResult};
use super::frame::CloseCode;
use super::manager::SessionManager;
use super::session::{write_loop, CloseInfo, SessionHandle, SessionState};
use super::upgrade::{AcceptedHandshake, Handshake, HandshakeRejection};
use crate::modules::http_handler::HttpMessage;
use crate::util::percent_decode;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Serves WebSocket sessions on one path.
pub struct WebSocketService {
    path: String,
    factory: BehaviorFactory,
    sessions: Arc<SessionManager>,
}

impl fmt::Debug for WebSocketService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketService")
            .field("path", &self.path)
            .field("sessions", &self.sessions.count())
            .finish_non_exhaustive()
    }
}

/// A handshake that passed validation, holding the behavior that will run
/// the session. Consumed by [`WebSocketService::run_session`].
pub struct PendingSession {
    behavior: Box<dyn WebSocketBehavior>,
    setup: SessionSetup,
    accepted: AcceptedHandshake,
}

impl fmt::Debug for PendingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSession")
            .field("setup", &self.setup)
            .field("accepted", &self.accepted)
            .finish_non_exhaustive()
    }
}

impl PendingSession {
    /// The `101 Switching Protocols` response to write before running the
    /// session.
    #[must_use]
    pub fn response(&self) -> HttpMessage {
        self.accepted.response()
    }

    /// Negotiated handshake parameters.
    #[must_use]
    pub fn accepted(&self) -> &AcceptedHandshake {
        &self.accepted
    }
}

/// Removes the session from its manager on every exit path.
struct Registration<'a> {
    manager: &'a SessionManager,
    id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.manager.remove(&self.id);
    }
}

impl WebSocketService {
    /// Create a service for `path`, building a fresh behavior per session.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::Config`] for an invalid path.
    pub fn new<F, B>(path: &str, factory: F, config: &WebSocketConfig) -> WebSocketResult<Self>
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: WebSocketBehavior,
    {
        let path = validate_service_path(path)?;
        let factory: BehaviorFactory =
            Arc::new(move || -> Box<dyn WebSocketBehavior> { Box::new(factory()) });
        Ok(Self {
            path,
            factory,
            sessions: Arc::new(SessionManager::new(config.session.wait_time)),
        })
    }

    /// Normalized service path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Live sessions of this service.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Validate an upgrade request against a fresh behavior's options.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeRejection`] to send back when validation fails.
    pub fn handshake(
        &self,
        request: &HttpMessage,
        config: &WebSocketConfig,
    ) -> Result<PendingSession, HandshakeRejection> {
        let mut behavior = (self.factory)();
        let mut setup = SessionSetup::from_config(config);
        behavior.on_connecting(&mut setup);

        let options = setup.handshake_options(config);
        let accepted = Handshake::new().validate(request, &options)?;
        debug!(
            path = %self.path,
            protocol = ?accepted.protocol,
            compression = accepted.compression,
            "Handshake accepted"
        );

        Ok(PendingSession {
            behavior,
            setup,
            accepted,
        })
    }

    /// Run an accepted session over `stream` until it closes.
    ///
    /// The handshake response must already have been written. Returns once
    /// the behavior has seen `on_close` and the writer has drained, or the
    /// drain timeout ran out.
    pub async fn run_session<S>(
        &self,
        pending: PendingSession,
        stream: S,
        remote_addr: SocketAddr,
        config: &WebSocketConfig,
        cancel: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let PendingSession {
            mut behavior,
            setup,
            accepted,
        } = pending;

        let encode = EncodeOptions {
            role: Role::Server,
            fragment_size: config.protocol.fragment_size,
            compress: accepted.compression,
        };
        let limits = FrameLimits {
            max_frame_size: config.limits.max_frame_size,
            max_message_size: config.limits.max_message_size,
            compression: accepted.compression,
        };

        let (session, rx) =
            SessionHandle::new(self.path.clone(), remote_addr, accepted.protocol, encode);
        let (mut reader, writer) = tokio::io::split(stream);
        let mut writer_task = tokio::spawn(write_loop(writer, rx, cancel.child_token()));

        let Some(id) = self.sessions.add(&session) else {
            debug!(path = %self.path, remote = %remote_addr, "Service stopping, refusing session");
            let _ = session.close(CloseCode::GoingAway, "");
            session.finish();
            drain_writer(&mut writer_task, config).await;
            return;
        };
        let registration = Registration {
            manager: &self.sessions,
            id,
        };

        session.set_state(SessionState::Open);
        info!(
            session = %registration.id,
            path = %self.path,
            remote = %remote_addr,
            "WebSocket session opened"
        );
        behavior.on_open(&session);

        let close = self
            .read_loop(&mut reader, &session, behavior.as_mut(), &setup, &limits, config, &cancel)
            .await;

        drop(registration);
        session.set_state(SessionState::Closed);
        info!(
            session = %session.id(),
            code = %close.code,
            clean = close.was_clean,
            "WebSocket session closed"
        );
        behavior.on_close(&session, &close);

        session.finish();
        drain_writer(&mut writer_task, config).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_loop<R>(
        &self,
        reader: &mut R,
        session: &SessionHandle,
        behavior: &mut dyn WebSocketBehavior,
        setup: &SessionSetup,
        limits: &FrameLimits,
        config: &WebSocketConfig,
        cancel: &CancellationToken,
    ) -> CloseInfo
    where
        R: AsyncRead + Unpin,
    {
        let mut assembler = MessageAssembler::new(*limits);
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let closing = session.state() == SessionState::Closing;
            let wait = if closing {
                let deadline = *drain_deadline
                    .get_or_insert_with(|| Instant::now() + config.session.drain_timeout);
                deadline.saturating_duration_since(Instant::now())
            } else {
                self.sessions.wait_time()
            };

            let read = tokio::select! {
                () = cancel.cancelled() => return unanswered(session, "Server stopped"),
                read = tokio::time::timeout(wait, read_frame(reader, limits, Role::Server)) => read,
            };

            let frame = match read {
                Ok(Ok(frame)) => frame,
                Err(_) if closing => {
                    debug!(session = %session.id(), "No Close frame from peer");
                    return unanswered(session, "Close not acknowledged");
                },
                Err(_) => {
                    debug!(session = %session.id(), "Session idle, closing");
                    let _ = session.close(CloseCode::GoingAway, "Idle timeout");
                    continue;
                },
                Ok(Err(WebSocketError::ConnectionClosed)) => {
                    return unanswered(session, "Connection closed");
                },
                Ok(Err(e @ WebSocketError::Io(_))) => {
                    warn!(session = %session.id(), error = %e, "WebSocket read failed");
                    behavior.on_error(session, &e);
                    return unanswered(session, e.to_string());
                },
                Ok(Err(e)) => {
                    protocol_failure(session, behavior, &e);
                    if e.leaves_stream_desynced() {
                        let deadline = *drain_deadline
                            .get_or_insert_with(|| Instant::now() + config.session.drain_timeout);
                        discard_input(reader, deadline, cancel).await;
                        return unanswered(session, e.to_string());
                    }
                    continue;
                },
            };

            let message = match assembler.push(frame) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    protocol_failure(session, behavior, &e);
                    continue;
                },
            };

            match message {
                Message::Close { code, reason } => {
                    if session.state() == SessionState::Closing {
                        let (code, reason) = session.close_sent().unwrap_or((code, reason));
                        return CloseInfo::clean(code, reason);
                    }
                    session.echo_close(code);
                    return CloseInfo::clean(code, reason);
                },
                Message::Ping(payload) => {
                    if setup.emit_on_ping() && session.state() == SessionState::Open {
                        behavior.on_message(session, Message::Ping(payload));
                    } else {
                        session.pong(payload);
                    }
                },
                Message::Pong(payload) => {
                    trace!(session = %session.id(), len = payload.len(), "Pong received");
                },
                data => {
                    if session.state() == SessionState::Open {
                        behavior.on_message(session, data);
                    } else {
                        trace!(session = %session.id(), "Dropping message received while closing");
                    }
                },
            }
        }
    }
}

/// Report a codec failure and start closing. Once the session is closing
/// the failure is only logged and reading continues until the peer's Close
/// or the drain deadline.
fn protocol_failure(
    session: &SessionHandle,
    behavior: &mut dyn WebSocketBehavior,
    error: &WebSocketError,
) {
    if session.state() == SessionState::Closing {
        debug!(session = %session.id(), error = %error, "Invalid frame while closing");
        return;
    }
    warn!(session = %session.id(), error = %error, "WebSocket protocol failure");
    behavior.on_error(session, error);
    session.fail(error.close_code());
}

/// Throw away raw input once frame boundaries are lost, until the peer
/// hangs up or the deadline passes.
async fn discard_input<R>(reader: &mut R, deadline: Instant, cancel: &CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return,
            read = tokio::time::timeout_at(deadline, reader.read(&mut buf)) => read,
        };
        match read {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return,
            Ok(Ok(n)) => trace!(len = n, "Discarded input after lost framing"),
        }
    }
}

/// Close info for a session whose closing handshake did not complete.
fn unanswered(session: &SessionHandle, reason: impl Into<String>) -> CloseInfo {
    match session.close_sent() {
        Some((code, reason)) => CloseInfo {
            code,
            reason,
            was_clean: false,
        },
        None => CloseInfo::abnormal(reason),
    }
}

async fn drain_writer(writer: &mut JoinHandle<WebSocketResult<()>>, config: &WebSocketConfig) {
    match tokio::time::timeout(config.session.drain_timeout, &mut *writer).await {
        Ok(Ok(Ok(()))) => {},
        Ok(Ok(Err(e))) => debug!(error = %e, "WebSocket writer failed"),
        Ok(Err(e)) => warn!(error = %e, "WebSocket writer task failed"),
        Err(_) => {
            debug!("WebSocket writer did not drain in time");
            writer.abort();
        },
    }
}

/// Check a path passed when registering a service and normalize it.
///
/// # Errors
///
/// Returns [`WebSocketError::Config`] for an empty path, one not starting
/// with `/`, or one containing `?` or `#`.
pub fn validate_service_path(path: &str) -> WebSocketResult<String> {
    if path.is_empty() {
        return Err(WebSocketError::Config("Service path is empty".to_string()));
    }
    if !path.starts_with('/') {
        return Err(WebSocketError::Config(format!(
            "Service path must start with '/': {path}"
        )));
    }
    if path.contains(|c: char| c == '?' || c == '#') {
        return Err(WebSocketError::Config(format!(
            "Service path must not contain a query or fragment: {path}"
        )));
    }
    Ok(normalize_path(path))
}

/// Percent-decode a path and trim trailing slashes. An empty result is `/`.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let decoded = percent_decode(raw);
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::websocket_handler::frame::{parse_close_payload, Frame, OpCode};
    use bytes::Bytes;
    use http::{Method, StatusCode, Uri};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    type Events = Arc<Mutex<Vec<String>>>;

    struct Echo {
        events: Events,
        protocol: Option<&'static str>,
        emit_on_ping: bool,
    }

    impl WebSocketBehavior for Echo {
        fn on_connecting(&mut self, setup: &mut SessionSetup) {
            if let Some(protocol) = self.protocol {
                setup.set_protocol(protocol).unwrap();
            }
            setup.set_emit_on_ping(self.emit_on_ping);
        }

        fn on_open(&mut self, _session: &SessionHandle) {
            self.events.lock().unwrap().push("open".to_string());
        }

        fn on_message(&mut self, session: &SessionHandle, message: Message) {
            match message {
                Message::Text(text) => {
                    self.events.lock().unwrap().push(format!("text:{text}"));
                    session.send_text(text).unwrap();
                },
                Message::Ping(_) => self.events.lock().unwrap().push("ping".to_string()),
                other => session.send(&other).unwrap(),
            }
        }

        fn on_error(&mut self, _session: &SessionHandle, error: &WebSocketError) {
            self.events.lock().unwrap().push(format!("error:{}", error.close_code()));
        }

        fn on_close(&mut self, _session: &SessionHandle, info: &CloseInfo) {
            self.events
                .lock()
                .unwrap()
                .push(format!("close:{}:{}", u16::from(info.code), info.was_clean));
        }
    }

    fn service(events: &Events, protocol: Option<&'static str>, emit_on_ping: bool) -> Arc<WebSocketService> {
        let events = events.clone();
        let service = WebSocketService::new(
            "/echo",
            move || Echo {
                events: events.clone(),
                protocol,
                emit_on_ping,
            },
            &WebSocketConfig::default(),
        )
        .unwrap();
        Arc::new(service)
    }

    fn upgrade_request() -> HttpMessage {
        let mut request = HttpMessage::request(Method::GET, Uri::from_static("/echo"));
        let headers = request.headers_mut();
        headers.append("Host", "localhost");
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Key", KEY);
        headers.append("Sec-WebSocket-Version", "13");
        request
    }

    fn config(wait_time: Duration) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.session.wait_time = wait_time;
        config.session.drain_timeout = Duration::from_millis(200);
        config
    }

    fn spawn_session(
        service: &Arc<WebSocketService>,
        config: WebSocketConfig,
    ) -> (DuplexStream, JoinHandle<()>) {
        let pending = service.handshake(&upgrade_request(), &config).unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let service = service.clone();
        let task = tokio::spawn(async move {
            service
                .run_session(
                    pending,
                    server,
                    "127.0.0.1:5000".parse().unwrap(),
                    &config,
                    CancellationToken::new(),
                )
                .await;
        });
        (client, task)
    }

    async fn send(client: &mut DuplexStream, frame: Frame) {
        client.write_all(&frame.with_mask(MASK).encode()).await.unwrap();
    }

    async fn recv(client: &mut DuplexStream) -> Frame {
        read_frame(client, &FrameLimits::default(), Role::Client)
            .await
            .unwrap()
    }

    async fn wait_for_events(events: &Events, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let snapshot = events.lock().unwrap().clone();
            if snapshot.len() >= count {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events.lock().unwrap().clone()
    }

    #[test]
    fn test_service_paths() {
        assert_eq!(validate_service_path("/chat/").unwrap(), "/chat");
        assert_eq!(validate_service_path("/").unwrap(), "/");
        assert!(validate_service_path("").is_err());
        assert!(validate_service_path("chat").is_err());
        assert!(validate_service_path("/chat?x=1").is_err());
        assert!(validate_service_path("/chat#top").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/my%20room//"), "/my room");
        assert_eq!(normalize_path("//"), "/");
        assert_eq!(normalize_path("/echo"), "/echo");
    }

    #[test]
    fn test_handshake_accepts() {
        let events = Events::default();
        let service = service(&events, None, false);
        let pending = service
            .handshake(&upgrade_request(), &WebSocketConfig::default())
            .unwrap();

        let response = pending.response();
        assert_eq!(response.status(), Some(StatusCode::SWITCHING_PROTOCOLS));
        assert_eq!(
            response.headers().get("sec-websocket-accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
        assert!(!pending.accepted().compression);
    }

    #[test]
    fn test_handshake_negotiates_protocol() {
        let events = Events::default();
        let service = service(&events, Some("chat"), false);
        let mut request = upgrade_request();
        request
            .headers_mut()
            .append("Sec-WebSocket-Protocol", "superchat, chat");

        let pending = service
            .handshake(&request, &WebSocketConfig::default())
            .unwrap();
        assert_eq!(pending.accepted().protocol.as_deref(), Some("chat"));
        assert_eq!(
            pending.response().headers().get("sec-websocket-protocol"),
            Some("chat")
        );
    }

    #[test]
    fn test_handshake_rejects() {
        let events = Events::default();
        let service = service(&events, None, false);
        let mut request = upgrade_request();
        request.headers_mut().remove("sec-websocket-key");

        let rejection = service
            .handshake(&request, &WebSocketConfig::default())
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_echo_and_clean_close() {
        let events = Events::default();
        let service = service(&events, None, false);
        let (mut client, task) = spawn_session(&service, config(Duration::from_secs(5)));

        send(&mut client, Frame::text("hello")).await;
        let reply = recv(&mut client).await;
        assert_eq!(reply.opcode, OpCode::Text);
        assert!(reply.mask.is_none());
        assert_eq!(&reply.payload[..], b"hello");
        assert_eq!(service.sessions().count(), 1);

        send(&mut client, Frame::close(CloseCode::Normal, "bye").unwrap()).await;
        let echo = recv(&mut client).await;
        assert_eq!(echo.opcode, OpCode::Close);
        assert_eq!(parse_close_payload(&echo.payload).unwrap().0, CloseCode::Normal);

        task.await.unwrap();
        assert_eq!(service.sessions().count(), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "text:hello", "close:1000:true"]
        );
    }

    #[tokio::test]
    async fn test_fragmented_message_delivered_once() {
        let events = Events::default();
        let service = service(&events, None, false);
        let (mut client, _task) = spawn_session(&service, config(Duration::from_secs(5)));

        send(&mut client, Frame::new(false, OpCode::Text, "He")).await;
        send(&mut client, Frame::ping("p").unwrap()).await;
        send(&mut client, Frame::new(false, OpCode::Continuation, "llo")).await;
        send(&mut client, Frame::new(true, OpCode::Continuation, " world")).await;

        let pong = recv(&mut client).await;
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(&pong.payload[..], b"p");

        let reply = recv(&mut client).await;
        assert_eq!(&reply.payload[..], b"Hello world");
    }

    #[tokio::test]
    async fn test_emit_on_ping_delivers_instead_of_pong() {
        let events = Events::default();
        let service = service(&events, None, true);
        let (mut client, _task) = spawn_session(&service, config(Duration::from_secs(5)));

        send(&mut client, Frame::ping(Bytes::from_static(b"x")).unwrap()).await;
        send(&mut client, Frame::text("after")).await;

        let reply = recv(&mut client).await;
        assert_eq!(reply.opcode, OpCode::Text);
        assert_eq!(wait_for_events(&events, 3).await[1], "ping");
    }

    #[tokio::test]
    async fn test_unmasked_frame_closes_with_protocol_error() {
        let events = Events::default();
        let service = service(&events, None, false);
        let (mut client, task) = spawn_session(&service, config(Duration::from_secs(5)));

        client.write_all(&Frame::text("plain").encode()).await.unwrap();

        let close = recv(&mut client).await;
        assert_eq!(close.opcode, OpCode::Close);
        let (code, reason) = parse_close_payload(&close.payload).unwrap();
        assert_eq!(code, CloseCode::Protocol);
        assert_eq!(reason, CloseCode::Protocol.reason_text());

        send(&mut client, Frame::close(CloseCode::Protocol, "").unwrap()).await;
        task.await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "error:1002", "close:1002:true"]
        );
    }

    #[tokio::test]
    async fn test_invalid_frame_while_closing_is_skipped() {
        let events = Events::default();
        let service = service(&events, None, false);
        let (mut client, task) = spawn_session(&service, config(Duration::from_secs(5)));

        client.write_all(&Frame::text("plain").encode()).await.unwrap();
        let close = recv(&mut client).await;
        assert_eq!(close.opcode, OpCode::Close);

        // Still unmasked, then the acknowledgement.
        client.write_all(&Frame::text("again").encode()).await.unwrap();
        send(&mut client, Frame::close(CloseCode::Protocol, "").unwrap()).await;
        task.await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "error:1002", "close:1002:true"]
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_discards_input() {
        let events = Events::default();
        let service = service(&events, None, false);
        let mut config = config(Duration::from_secs(5));
        config.limits.max_frame_size = 100;
        let (mut client, task) = spawn_session(&service, config);

        send(&mut client, Frame::binary(vec![0u8; 200])).await;
        let close = recv(&mut client).await;
        let (code, _) = parse_close_payload(&close.payload).unwrap();
        assert_eq!(code, CloseCode::MessageTooBig);

        // Framing is lost, so even a well-formed Close is not read.
        send(&mut client, Frame::close(CloseCode::MessageTooBig, "").unwrap()).await;
        drop(client);
        task.await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "error:1009", "close:1009:false"]
        );
    }

    #[tokio::test]
    async fn test_idle_session_closed() {
        let events = Events::default();
        let service = service(&events, None, false);
        let (mut client, task) = spawn_session(&service, config(Duration::from_millis(50)));

        let close = recv(&mut client).await;
        let (code, reason) = parse_close_payload(&close.payload).unwrap();
        assert_eq!(code, CloseCode::GoingAway);
        assert_eq!(reason, "Idle timeout");

        // No acknowledgement; the drain timeout ends the session.
        task.await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "close:1001:false"]
        );
    }

    #[tokio::test]
    async fn test_peer_disconnect_is_abnormal() {
        let events = Events::default();
        let service = service(&events, None, false);
        let (client, task) = spawn_session(&service, config(Duration::from_secs(5)));

        drop(client);
        task.await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "close:1006:false"]
        );
    }

    #[tokio::test]
    async fn test_stopped_manager_refuses_session() {
        let events = Events::default();
        let service = service(&events, None, false);
        service.sessions().stop(CloseCode::GoingAway, "");
        let (mut client, task) = spawn_session(&service, config(Duration::from_secs(5)));

        let close = recv(&mut client).await;
        assert_eq!(parse_close_payload(&close.payload).unwrap().0, CloseCode::GoingAway);
        task.await.unwrap();
        assert!(events.lock().unwrap().is_empty());
    }
}
