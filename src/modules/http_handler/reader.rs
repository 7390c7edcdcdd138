//! Reading HTTP messages from a buffered byte stream.
//!
//! The head is consumed exactly through the terminating `CRLF CRLF`; any
//! bytes after it stay in the reader's buffer for whoever reads next (the
//! body reader, the next keep-alive request, or a WebSocket frame codec).

use super::body::Body;
use super::config::HttpConfig;
use super::error::{HttpError, HttpResult};
use super::message::{Direction, HttpMessage};
use crate::util::{read_fully, ReadOutcome, ZERO_READ_RETRIES};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

/// Marks the end of a message head.
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Read one request from `reader`.
///
/// # Errors
///
/// - [`HttpError::ConnectionClosed`] if the stream ends before any byte
/// - [`HttpError::Timeout`] if the head or body is not complete in time
/// - [`HttpError::HeaderTooLarge`] / [`HttpError::BodyTooLarge`] on limits
/// - a parse error from [`HttpMessage::parse_head`]
pub async fn read_request<R>(reader: &mut R, config: &HttpConfig) -> HttpResult<HttpMessage>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    read_message(reader, Direction::Request, config).await
}

/// Read one response from `reader`. Used by the client side of tests and
/// tools talking to the server.
///
/// # Errors
///
/// Same as [`read_request`].
pub async fn read_response<R>(reader: &mut R, config: &HttpConfig) -> HttpResult<HttpMessage>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    read_message(reader, Direction::Response, config).await
}

async fn read_message<R>(
    reader: &mut R,
    direction: Direction,
    config: &HttpConfig,
) -> HttpResult<HttpMessage>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let timeout = config.read_timeout;
    tokio::time::timeout(timeout, async {
        let head = read_head(reader, config.max_header_size).await?;
        let mut message = HttpMessage::parse_head(&head, direction)?;

        match body_framing(&message)? {
            BodyFraming::Length(length) => {
                if length > config.max_body_size {
                    return Err(HttpError::BodyTooLarge {
                        size: length,
                        max: config.max_body_size,
                    });
                }

                if length > 0 {
                    let mut body = vec![0u8; length];
                    match read_fully(reader, &mut body, ZERO_READ_RETRIES).await? {
                        ReadOutcome::Full => message.set_body(Body::from(body)),
                        ReadOutcome::Short(n) => {
                            return Err(HttpError::MalformedRequest(format!(
                                "Body ended after {n} of {length} bytes"
                            )));
                        },
                    }
                }
            },
            BodyFraming::Chunked => {
                let body = read_chunked(reader, config).await?;
                let headers = message.headers_mut();
                headers.remove("transfer-encoding");
                headers.insert("Content-Length", body.len().to_string());
                if !body.is_empty() {
                    message.set_body(Body::from(body));
                }
            },
        }

        Ok(message)
    })
    .await
    .map_err(|_| HttpError::Timeout(timeout))?
}

/// Read bytes up to and including the head terminator, returning the head
/// without the final blank line.
async fn read_head<R>(reader: &mut R, max: usize) -> HttpResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut head = Vec::with_capacity(512);

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if head.is_empty() {
                return Err(HttpError::ConnectionClosed);
            }
            return Err(HttpError::MalformedRequest(
                "Connection closed before end of headers".to_string(),
            ));
        }

        let mut used = 0;
        let mut complete = false;
        for &byte in available {
            head.push(byte);
            used += 1;
            if head.ends_with(HEAD_TERMINATOR) {
                complete = true;
                break;
            }
        }
        reader.consume(used);

        if complete {
            head.truncate(head.len() - HEAD_TERMINATOR.len());
            trace!(bytes = head.len(), "Read message head");
            return Ok(head);
        }

        if head.len() > max {
            return Err(HttpError::HeaderTooLarge {
                size: head.len(),
                max,
            });
        }
    }
}

/// How the body after a head is delimited.
enum BodyFraming {
    Length(usize),
    Chunked,
}

fn body_framing(message: &HttpMessage) -> HttpResult<BodyFraming> {
    let codings: Vec<&str> = message
        .headers()
        .get_all("transfer-encoding")
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|coding| !coding.is_empty())
        .collect();
    if codings.is_empty() {
        return content_length(message).map(BodyFraming::Length);
    }

    if message.headers().contains("content-length") {
        return Err(HttpError::MalformedRequest(
            "Both Transfer-Encoding and Content-Length are set".to_string(),
        ));
    }
    match codings.as_slice() {
        [coding] if coding.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
        _ => Err(HttpError::UnsupportedTransferEncoding(codings.join(", "))),
    }
}

/// Decode a chunked body. Chunk extensions and trailers are dropped.
async fn read_chunked<R>(reader: &mut R, config: &HttpConfig) -> HttpResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut body = Vec::new();

    loop {
        let line = read_line(reader, config.max_header_size).await?;
        let digits = line.split(';').next().unwrap_or_default().trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HttpError::MalformedRequest(format!(
                "Invalid chunk size: {line}"
            )));
        }
        let size = usize::from_str_radix(digits, 16).map_err(|_| {
            HttpError::MalformedRequest(format!("Invalid chunk size: {line}"))
        })?;
        if size == 0 {
            break;
        }

        let total = body.len().saturating_add(size);
        if total > config.max_body_size {
            return Err(HttpError::BodyTooLarge {
                size: total,
                max: config.max_body_size,
            });
        }
        let start = body.len();
        body.resize(total, 0);
        if let ReadOutcome::Short(n) =
            read_fully(reader, &mut body[start..], ZERO_READ_RETRIES).await?
        {
            return Err(HttpError::MalformedRequest(format!(
                "Chunk ended after {n} of {size} bytes"
            )));
        }

        let mut crlf = [0u8; 2];
        let outcome = read_fully(reader, &mut crlf, ZERO_READ_RETRIES).await?;
        if !matches!(outcome, ReadOutcome::Full) || &crlf != b"\r\n" {
            return Err(HttpError::MalformedRequest(
                "Chunk data not followed by CRLF".to_string(),
            ));
        }
    }

    let mut trailer_size = 0;
    loop {
        let line = read_line(reader, config.max_header_size).await?;
        if line.is_empty() {
            break;
        }
        trailer_size += line.len();
        if trailer_size > config.max_header_size {
            return Err(HttpError::HeaderTooLarge {
                size: trailer_size,
                max: config.max_header_size,
            });
        }
    }

    trace!(bytes = body.len(), "Read chunked body");
    Ok(body)
}

/// Read one CRLF-terminated line of at most `max` bytes, without the line
/// ending.
async fn read_line<R>(reader: &mut R, max: usize) -> HttpResult<String>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(2);
    let mut line = Vec::new();
    (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;

    if !line.ends_with(b"\n") {
        if line.len() as u64 >= limit {
            return Err(HttpError::HeaderTooLarge {
                size: line.len(),
                max,
            });
        }
        return Err(HttpError::MalformedRequest(
            "Connection closed inside chunked body".to_string(),
        ));
    }
    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| HttpError::MalformedRequest("Chunk line is not UTF-8".to_string()))
}

fn content_length(message: &HttpMessage) -> HttpResult<usize> {
    match message.headers().get("content-length") {
        Some(raw) => raw.trim().parse().map_err(|_| {
            HttpError::MalformedRequest(format!("Invalid Content-Length: {raw}"))
        }),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, BufReader};

    #[tokio::test]
    async fn test_read_request_with_body() {
        let raw: &[u8] = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(raw);

        let mut msg = read_request(&mut reader, &HttpConfig::default())
            .await
            .unwrap();
        assert_eq!(msg.method(), Some(&Method::POST));
        assert_eq!(msg.path(), "/submit");
        assert_eq!(&msg.take_body().unwrap().into_bytes()[..], b"hello");
    }

    #[tokio::test]
    async fn test_no_read_past_head() {
        let raw: &[u8] = b"GET /ws HTTP/1.1\r\nHost: a\r\n\r\n\x81\x85frame";
        let mut reader = BufReader::new(raw);

        let msg = read_request(&mut reader, &HttpConfig::default())
            .await
            .unwrap();
        assert!(!msg.has_body());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"\x81\x85frame");
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let raw: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::with_capacity(7, raw);
        let config = HttpConfig::default();

        let first = read_request(&mut reader, &config).await.unwrap();
        let second = read_request(&mut reader, &config).await.unwrap();
        assert_eq!(first.path(), "/a");
        assert_eq!(second.path(), "/b");

        let err = read_request(&mut reader, &config).await.unwrap_err();
        assert!(matches!(err, HttpError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_header_too_large() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(100));
        let mut reader = BufReader::new(raw.as_slice());
        let config = HttpConfig {
            max_header_size: 64,
            ..HttpConfig::default()
        };

        let err = read_request(&mut reader, &config).await.unwrap_err();
        assert!(matches!(err, HttpError::HeaderTooLarge { max: 64, .. }));
    }

    #[tokio::test]
    async fn test_truncated_head() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost: a\r\n";
        let mut reader = BufReader::new(raw);

        let err = read_request(&mut reader, &HttpConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let raw: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let config = HttpConfig {
            max_body_size: 10,
            ..HttpConfig::default()
        };

        let err = read_request(&mut reader, &config).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { size: 100, max: 10 }));
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let raw: &[u8] = b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
            5;name=value\r\nhello\r\n7\r\n, world\r\n0\r\nX-Trailer: 1\r\n\r\nGET /next HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let config = HttpConfig::default();

        let mut msg = read_request(&mut reader, &config).await.unwrap();
        assert_eq!(msg.headers().get("content-length"), Some("12"));
        assert!(!msg.headers().contains("transfer-encoding"));
        assert_eq!(&msg.take_body().unwrap().into_bytes()[..], b"hello, world");

        let next = read_request(&mut reader, &config).await.unwrap();
        assert_eq!(next.path(), "/next");
    }

    #[tokio::test]
    async fn test_chunked_body_limit() {
        let raw: &[u8] = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n8\r\n12345678\r\n8\r\n";
        let mut reader = BufReader::new(raw);
        let config = HttpConfig {
            max_body_size: 10,
            ..HttpConfig::default()
        };

        let err = read_request(&mut reader, &config).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { size: 16, max: 10 }));
    }

    #[tokio::test]
    async fn test_malformed_chunks() {
        let config = HttpConfig::default();
        for raw in [
            &b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"[..],
            &b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcde\r\n0\r\n\r\n"[..],
            &b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel"[..],
            &b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\n"[..],
        ] {
            let mut reader = BufReader::new(raw);
            let err = read_request(&mut reader, &config).await.unwrap_err();
            assert!(matches!(err, HttpError::MalformedRequest(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn test_unsupported_transfer_encoding() {
        let raw: &[u8] = b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n0\r\n\r\n";
        let mut reader = BufReader::new(raw);

        let err = read_request(&mut reader, &HttpConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedTransferEncoding(_)));
        assert_eq!(err.status_code(), http::StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        let config = HttpConfig {
            read_timeout: Duration::from_millis(50),
            ..HttpConfig::default()
        };

        let err = read_request(&mut reader, &config).await.unwrap_err();
        assert!(matches!(err, HttpError::Timeout(_)));
        drop(client);
    }

    #[tokio::test]
    async fn test_read_response() {
        let raw: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 3\r\n\r\nnah";
        let mut reader = BufReader::new(raw);

        let mut msg = read_response(&mut reader, &HttpConfig::default())
            .await
            .unwrap();
        assert_eq!(msg.status(), Some(http::StatusCode::NOT_FOUND));
        assert_eq!(msg.take_body().unwrap().into_text().unwrap(), "nah");
    }
}
