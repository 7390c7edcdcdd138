//! HTTP message model shared by requests and responses.

use super::body::Body;
use super::error::{HttpError, HttpResult};
use super::headers::Headers;
use crate::util::is_token;
use bytes::BytesMut;
use http::{Method, StatusCode, Uri, Version};
use std::str::FromStr;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Which side of an exchange a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

/// The first line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD target VERSION`
    Request {
        /// Request method.
        method: Method,
        /// Request target as sent.
        target: Uri,
    },
    /// `VERSION status reason`
    Response {
        /// Status code.
        status: StatusCode,
        /// Reason phrase.
        reason: String,
    },
}

/// A parsed or outgoing HTTP/1.x message.
#[derive(Debug)]
pub struct HttpMessage {
    start: StartLine,
    version: Version,
    headers: Headers,
    body: Option<Body>,
}

impl HttpMessage {
    /// Create an HTTP/1.1 request.
    #[must_use]
    pub fn request(method: Method, target: Uri) -> Self {
        Self {
            start: StartLine::Request { method, target },
            version: Version::HTTP_11,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Create an HTTP/1.1 response with the canonical reason phrase.
    #[must_use]
    pub fn response(status: StatusCode) -> Self {
        Self {
            start: StartLine::Response {
                status,
                reason: status.canonical_reason().unwrap_or("").to_string(),
            },
            version: Version::HTTP_11,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Which side of the exchange this message is.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.start {
            StartLine::Request { .. } => Direction::Request,
            StartLine::Response { .. } => Direction::Response,
        }
    }

    /// The start line.
    #[must_use]
    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    /// Protocol version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Set the protocol version.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Request method, for requests.
    #[must_use]
    pub fn method(&self) -> Option<&Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Request target, for requests.
    #[must_use]
    pub fn target(&self) -> Option<&Uri> {
        match &self.start {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Response { .. } => None,
        }
    }

    /// Path component of the request target. Empty for responses.
    #[must_use]
    pub fn path(&self) -> &str {
        self.target().map_or("", Uri::path)
    }

    /// Query component of the request target.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target().and_then(Uri::query)
    }

    /// Status code, for responses.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// Change the status of a response and reset its reason phrase.
    ///
    /// Has no effect on requests.
    pub fn set_status(&mut self, status: StatusCode) {
        if let StartLine::Response {
            status: current,
            reason,
        } = &mut self.start
        {
            *current = status;
            *reason = status.canonical_reason().unwrap_or("").to_string();
        }
    }

    /// Returns `true` if a body is still attached.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Length of the attached body, if any.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Body::len)
    }

    /// Move the body out of the message.
    ///
    /// A second call returns `None`.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Attach a body, replacing any previous one.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = Some(body.into());
    }

    /// Returns `true` for a GET request on HTTP/1.1 or later that asks to
    /// upgrade to WebSocket.
    #[must_use]
    pub fn is_websocket_request(&self) -> bool {
        self.method() == Some(&Method::GET)
            && self.version >= Version::HTTP_11
            && self.headers.contains_token("upgrade", "websocket")
            && self.headers.contains_token("connection", "upgrade")
    }

    /// Whether the connection may be reused after this message.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.headers.contains_token("connection", "close"),
            Version::HTTP_10 => self.headers.contains_token("connection", "keep-alive"),
            _ => false,
        }
    }

    /// Serialize the head and body.
    ///
    /// `Content-Length` is added when missing: for any response that may
    /// carry a body, and for requests with a non-empty body.
    #[must_use]
    pub fn to_bytes(&self) -> BytesMut {
        let body = self.body.as_ref().map_or(&[][..], Body::as_bytes);
        let mut buf = BytesMut::with_capacity(256 + body.len());

        let version = version_str(self.version);
        let start = match &self.start {
            StartLine::Request { method, target } => format!("{method} {target} {version}\r\n"),
            StartLine::Response { status, reason } => {
                format!("{version} {} {reason}\r\n", status.as_u16())
            },
        };
        buf.extend_from_slice(start.as_bytes());

        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        let needs_length = match &self.start {
            StartLine::Response { status, .. } => {
                !(status.is_informational()
                    || *status == StatusCode::NO_CONTENT
                    || *status == StatusCode::NOT_MODIFIED)
            },
            StartLine::Request { .. } => !body.is_empty(),
        };
        if needs_length && !self.headers.contains("content-length") {
            buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(body);
        buf
    }

    /// Write the serialized message and flush.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the writer.
    pub async fn write_to<W>(&self, writer: &mut W) -> HttpResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Parse a message head (start line and headers, without the blank
    /// line) into a message without a body.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::MalformedRequest`] if the start line does not
    /// split into its three parts or a header line has no colon, and a
    /// more specific error for an unparsable method, target, version or
    /// status.
    pub fn parse_head(head: &[u8], direction: Direction) -> HttpResult<Self> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split("\r\n");

        let first = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| HttpError::MalformedRequest("Empty start line".to_string()))?;

        let (start, version) = match direction {
            Direction::Request => parse_request_line(first)?,
            Direction::Response => parse_status_line(first)?,
        };

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if headers.extend_last(line.trim()) {
                    continue;
                }
                return Err(HttpError::MalformedRequest(format!(
                    "Invalid header: {line}"
                )));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::MalformedRequest(format!("Invalid header: {line}")))?;
            if !is_token(name) {
                return Err(HttpError::MalformedRequest(format!(
                    "Invalid header name: {line}"
                )));
            }
            headers.append(name, value.trim());
        }

        Ok(Self {
            start,
            version,
            headers,
            body: None,
        })
    }
}

fn parse_request_line(line: &str) -> HttpResult<(StartLine, Version)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(HttpError::MalformedRequest(format!(
            "Invalid request line: {line}"
        )));
    }

    let method = Method::from_str(parts[0])?;
    let target = Uri::from_str(parts[1])?;
    let version = parse_version(parts[2])?;

    Ok((StartLine::Request { method, target }, version))
}

fn parse_status_line(line: &str) -> HttpResult<(StartLine, Version)> {
    let mut parts = line.splitn(3, ' ');
    let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
        return Err(HttpError::MalformedRequest(format!(
            "Invalid status line: {line}"
        )));
    };
    let reason = parts.next().unwrap_or("").to_string();

    let version = parse_version(version)?;
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| HttpError::InvalidStatus(code.to_string()))?;

    Ok((StartLine::Response { status, reason }, version))
}

fn parse_version(raw: &str) -> HttpResult<Version> {
    match raw {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        other => Err(HttpError::InvalidVersion(other.to_string())),
    }
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}
