//! Text helpers for header values, paths and diagnostic output.

use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Separators that may not appear in an RFC 2616 token.
const TSPECIALS: &str = "()<>@,;:\\\"/[]?={} \t";

/// Derive a short request correlation id from a timestamp and an endpoint.
///
/// Collisions are possible; the id only groups log lines.
#[must_use]
pub fn correlation_id(timestamp: i64, endpoint: &str) -> String {
    let mut hasher = DefaultHasher::new();
    timestamp.hash(&mut hasher);
    endpoint.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Escape text for inclusion in an HTML document.
#[must_use]
pub fn html_escape(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Decode `%XX` escapes in a URL path.
///
/// Malformed escapes are kept verbatim and invalid UTF-8 is replaced.
#[must_use]
pub fn percent_decode(input: &str) -> Cow<'_, str> {
    if !input.contains('%') {
        return Cow::Borrowed(input);
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Returns `true` if `value` is a non-empty RFC 2616 token.
#[must_use]
pub fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c > ' ' && c < '\u{7f}' && !TSPECIALS.contains(c))
}

/// Returns `true` if a comma-separated header value lists `token`.
///
/// Comparison ignores ASCII case and surrounding whitespace.
#[must_use]
pub fn header_contains(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
