//! Helpers shared by the integration tests: a local server and a minimal
//! raw-socket WebSocket client.

#![allow(dead_code)]

use r0n_embed::config::{ListenerConfig, ServerConfig};
use r0n_embed::modules::http_handler::{read_response, HttpConfig, HttpMessage};
use r0n_embed::modules::websocket_handler::codec::{read_frame, FrameLimits};
use r0n_embed::modules::websocket_handler::{compute_accept_key, CloseCode, Frame, Role};
use r0n_embed::server::WebServer;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration bound to an ephemeral localhost port.
pub fn local_config() -> ServerConfig {
    ServerConfig {
        listener: ListenerConfig::localhost(0),
        ..ServerConfig::default()
    }
}

/// Start `server` and return its bound address.
pub async fn start(server: &WebServer) -> SocketAddr {
    server.start().await.expect("server should start")
}

/// Send one raw request and read the response.
pub async fn request(addr: SocketAddr, raw: &str) -> HttpMessage {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(raw.as_bytes())
        .await
        .expect("write request");
    read_response(&mut reader, &HttpConfig::default())
        .await
        .expect("read response")
}

/// `GET path` with `Connection: close`.
pub async fn get(addr: SocketAddr, path: &str) -> HttpMessage {
    request(
        addr,
        &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await
}

/// Response body as text.
pub fn body_text(mut response: HttpMessage) -> String {
    response
        .take_body()
        .map(|body| body.into_text().expect("utf-8 body"))
        .unwrap_or_default()
}

/// The upgrade request for `path`.
pub fn upgrade_request(path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// A client speaking WebSocket frames over a plain TCP stream.
pub struct WsClient {
    reader: BufReader<TcpStream>,
    limits: FrameLimits,
}

impl WsClient {
    /// Connect and complete the opening handshake on `path`.
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut reader = BufReader::new(stream);
        reader
            .get_mut()
            .write_all(upgrade_request(path).as_bytes())
            .await
            .expect("write upgrade");

        let response = read_response(&mut reader, &HttpConfig::default())
            .await
            .expect("read handshake response");
        assert_eq!(response.status().map(|s| s.as_u16()), Some(101));
        assert_eq!(
            response.headers().get("sec-websocket-accept"),
            Some(compute_accept_key(CLIENT_KEY).as_str())
        );

        Self {
            reader,
            limits: FrameLimits::default(),
        }
    }

    /// Send a frame, masked as clients must.
    pub async fn send(&mut self, frame: Frame) {
        let bytes = frame.with_mask(MASK).encode();
        self.reader
            .get_mut()
            .write_all(&bytes)
            .await
            .expect("write frame");
    }

    /// Send a text message in a single frame.
    pub async fn send_text(&mut self, text: &str) {
        self.send(Frame::text(text)).await;
    }

    /// Send a Close frame.
    pub async fn send_close(&mut self, code: CloseCode, reason: &str) {
        self.send(Frame::close(code, reason).expect("close frame"))
            .await;
    }

    /// Read the next frame from the server.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(TIMEOUT, read_frame(&mut self.reader, &self.limits, Role::Client))
            .await
            .expect("frame within timeout")
            .expect("valid frame")
    }
}
