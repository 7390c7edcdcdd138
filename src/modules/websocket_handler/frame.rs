//! WebSocket frame types.
//!
//! A [`Frame`] is one unit on the wire. Its payload is always stored
//! unmasked; the masking key, if any, is applied when encoding.

use super::error::{WebSocketError, WebSocketResult};
use crate::util::{apply_mask, from_be_u16, to_be_bytes_u16, to_be_bytes_u64};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation frame.
    Continuation,
    /// Text frame.
    Text,
    /// Binary frame.
    Binary,
    /// Close frame.
    Close,
    /// Ping frame.
    Ping,
    /// Pong frame.
    Pong,
}

impl OpCode {
    /// Check if this is a control frame.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Check if this is a data frame.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text | Self::Binary | Self::Continuation)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(WebSocketError::InvalidFrame(format!(
                "Reserved opcode: {other:#x}"
            ))),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// WebSocket close codes as defined in RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure.
    Normal,
    /// Endpoint going away.
    GoingAway,
    /// Protocol error.
    Protocol,
    /// Unsupported data type.
    Unsupported,
    /// No status received. Internal only.
    NoStatus,
    /// Abnormal closure. Internal only.
    Abnormal,
    /// Invalid frame payload data.
    InvalidData,
    /// Policy violation.
    PolicyViolation,
    /// Message too big.
    MessageTooBig,
    /// Missing extension.
    MissingExtension,
    /// Internal server error.
    InternalError,
    /// TLS handshake failure. Internal only.
    TlsHandshake,
    /// Any other code.
    Custom(u16),
}

impl CloseCode {
    /// Check if the code is inside the ranges RFC 6455 assigns.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let code: u16 = (*self).into();
        matches!(code, 1000..=1011 | 1015 | 3000..=4999)
    }

    /// Check if this is a reserved close code.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        let code: u16 = (*self).into();
        matches!(code, 1004 | 1005 | 1006 | 1015)
    }

    /// Check if the code may appear in a Close frame.
    #[must_use]
    pub fn is_valid_on_wire(&self) -> bool {
        self.is_valid() && !self.is_reserved()
    }

    /// Standard reason text used when the server closes because of an error.
    #[must_use]
    pub fn reason_text(&self) -> &'static str {
        match self {
            Self::Protocol => "A WebSocket protocol error has occurred.",
            Self::Unsupported => "Unsupported data has been received.",
            Self::Abnormal => "An exception has occurred.",
            Self::InvalidData => "Invalid data has been received.",
            Self::PolicyViolation => "A policy violation has occurred.",
            Self::MessageTooBig => "A too big message has been received.",
            Self::MissingExtension => "WebSocket client didn't receive expected extension(s).",
            Self::InternalError => "WebSocket server got an internal error.",
            Self::TlsHandshake => "An error has occurred during a TLS handshake.",
            _ => "",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(value: u16) -> Self {
        match value {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidData,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MissingExtension,
            1011 => Self::InternalError,
            1015 => Self::TlsHandshake,
            code => Self::Custom(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(value: CloseCode) -> Self {
        match value {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MissingExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Custom(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Reserved bit 1 (per-message compression).
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Operation code.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create an unmasked frame with all reserved bits clear.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// A final text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(true, OpCode::Text, Bytes::from(text.into()))
    }

    /// A final binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// A Ping frame.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds [`MAX_CONTROL_PAYLOAD`].
    pub fn ping(payload: impl Into<Bytes>) -> WebSocketResult<Self> {
        Self::control(OpCode::Ping, payload.into())
    }

    /// A Pong frame.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds [`MAX_CONTROL_PAYLOAD`].
    pub fn pong(payload: impl Into<Bytes>) -> WebSocketResult<Self> {
        Self::control(OpCode::Pong, payload.into())
    }

    /// A Close frame.
    ///
    /// [`CloseCode::NoStatus`] produces an empty payload. Other reserved
    /// codes are refused so that they never reach the wire.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::InvalidCloseCode`] for a reserved or
    /// out-of-range code, or a protocol error if the reason makes the
    /// payload longer than [`MAX_CONTROL_PAYLOAD`].
    pub fn close(code: CloseCode, reason: &str) -> WebSocketResult<Self> {
        if code == CloseCode::NoStatus {
            return Self::control(OpCode::Close, Bytes::new());
        }
        if !code.is_valid_on_wire() {
            return Err(WebSocketError::InvalidCloseCode(code.into()));
        }

        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_slice(&to_be_bytes_u16(code.into()));
        payload.put_slice(reason.as_bytes());
        Self::control(OpCode::Close, payload.freeze())
    }

    fn control(opcode: OpCode, payload: Bytes) -> WebSocketResult<Self> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::Protocol(format!(
                "Control frame payload of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                payload.len()
            )));
        }
        Ok(Self::new(true, opcode, payload))
    }

    /// Set the masking key.
    #[must_use]
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Serialize the frame.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(14 + self.payload.len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the serialized frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let mut first = u8::from(self.opcode);
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        if self.rsv2 {
            first |= 0x20;
        }
        if self.rsv3 {
            first |= 0x10;
        }
        buf.put_u8(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        let len = self.payload.len();
        if len < 126 {
            buf.put_u8(mask_bit | len as u8);
        } else if let Ok(short) = u16::try_from(len) {
            buf.put_u8(mask_bit | 126);
            buf.put_slice(&to_be_bytes_u16(short));
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_slice(&to_be_bytes_u64(len as u64));
        }

        match self.mask {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], key);
            },
            None => buf.put_slice(&self.payload),
        }
    }
}

/// Split a Close payload into its status and reason.
///
/// An empty payload means no status was sent and yields
/// [`CloseCode::NoStatus`].
///
/// # Errors
///
/// Fails on a one-byte payload, a code that must not be sent, or a reason
/// that is not UTF-8.
pub fn parse_close_payload(payload: &[u8]) -> WebSocketResult<(CloseCode, String)> {
    if payload.is_empty() {
        return Ok((CloseCode::NoStatus, String::new()));
    }

    let code = from_be_u16(payload)
        .map(CloseCode::from)
        .ok_or_else(|| WebSocketError::InvalidFrame("Close payload of 1 byte".to_string()))?;
    if !code.is_valid_on_wire() {
        return Err(WebSocketError::InvalidCloseCode(code.into()));
    }

    let reason = std::str::from_utf8(&payload[2..]).map_err(|_| WebSocketError::InvalidUtf8)?;
    Ok((code, reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(OpCode::try_from(0).unwrap(), OpCode::Continuation);
        assert_eq!(OpCode::try_from(1).unwrap(), OpCode::Text);
        assert_eq!(OpCode::try_from(2).unwrap(), OpCode::Binary);
        assert_eq!(OpCode::try_from(8).unwrap(), OpCode::Close);
        assert_eq!(OpCode::try_from(9).unwrap(), OpCode::Ping);
        assert_eq!(OpCode::try_from(10).unwrap(), OpCode::Pong);

        for reserved in [3u8, 7, 0xB, 0xF] {
            assert!(OpCode::try_from(reserved).is_err());
        }
    }

    #[test]
    fn test_opcode_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(OpCode::Continuation.is_data());
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::TlsHandshake.is_reserved());
        assert!(CloseCode::from(1004).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());

        assert!(CloseCode::Normal.is_valid_on_wire());
        assert!(CloseCode::Custom(4000).is_valid_on_wire());
        assert!(!CloseCode::Custom(999).is_valid_on_wire());
        assert!(!CloseCode::Custom(2000).is_valid_on_wire());
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(
            CloseCode::Protocol.reason_text(),
            "A WebSocket protocol error has occurred."
        );
        assert_eq!(CloseCode::Normal.reason_text(), "");
    }

    #[test]
    fn test_encode_unmasked_text() {
        let frame = Frame::text("Hello");
        assert_eq!(
            &frame.encode()[..],
            &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
    }

    #[test]
    fn test_encode_masked_text() {
        // RFC 6455 section 5.7
        let frame = Frame::text("Hello").with_mask([0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(
            &frame.encode()[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_extended_lengths() {
        let medium = Frame::binary(vec![0u8; 256]).encode();
        assert_eq!(&medium[..4], &[0x82, 126, 0x01, 0x00]);
        assert_eq!(medium.len(), 4 + 256);

        let large = Frame::binary(vec![0u8; 65_536]).encode();
        assert_eq!(&large[..10], &[0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_close_frame() {
        let frame = Frame::close(CloseCode::Normal, "bye").unwrap();
        assert_eq!(&frame.payload[..], &[0x03, 0xe8, b'b', b'y', b'e']);

        let empty = Frame::close(CloseCode::NoStatus, "ignored").unwrap();
        assert!(empty.payload.is_empty());

        assert!(matches!(
            Frame::close(CloseCode::Abnormal, ""),
            Err(WebSocketError::InvalidCloseCode(1006))
        ));
        assert!(Frame::close(CloseCode::Normal, &"x".repeat(124)).is_err());
    }

    #[test]
    fn test_control_payload_limit() {
        assert!(Frame::ping(vec![0u8; 125]).is_ok());
        assert!(Frame::ping(vec![0u8; 126]).is_err());
    }

    #[test]
    fn test_parse_close_payload() {
        let (code, reason) = parse_close_payload(&[0x03, 0xe9, b'o', b'k']).unwrap();
        assert_eq!(code, CloseCode::GoingAway);
        assert_eq!(reason, "ok");

        let (code, _) = parse_close_payload(&[]).unwrap();
        assert_eq!(code, CloseCode::NoStatus);

        assert!(parse_close_payload(&[0x03]).is_err());
        assert!(parse_close_payload(&[0x03, 0xed]).is_err()); // 1005
        assert!(matches!(
            parse_close_payload(&[0x03, 0xe8, 0xff]),
            Err(WebSocketError::InvalidUtf8)
        ));
    }
}
