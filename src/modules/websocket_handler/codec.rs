//! Frame codec: reading frames off a stream, reassembling them into
//! messages, and splitting messages back into frames.

use super::error::{WebSocketError, WebSocketResult};
use super::frame::{parse_close_payload, CloseCode, Frame, OpCode, MAX_CONTROL_PAYLOAD};
use crate::util::{
    apply_mask, deflate, from_be_u16, from_be_u64, inflate, read_fully, ReadOutcome,
    ZERO_READ_RETRIES,
};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Which end of the connection the codec runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects masked frames, sends unmasked ones.
    Server,
    /// Expects unmasked frames, sends masked ones.
    Client,
}

/// Limits and negotiated options applied while reading.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Maximum payload of a single frame.
    pub max_frame_size: usize,
    /// Maximum size of a reassembled (and inflated) message.
    pub max_message_size: usize,
    /// `permessage-deflate` was negotiated, so RSV1 is meaningful.
    pub compression: bool,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            compression: false,
        }
    }
}

/// Options applied while encoding outgoing messages.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Sending side; clients mask every frame.
    pub role: Role,
    /// Largest payload per data frame.
    pub fragment_size: usize,
    /// Deflate data messages.
    pub compress: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            role: Role::Server,
            fragment_size: 1016,
            compress: false,
        }
    }
}

/// An application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Binary data.
    Binary(Bytes),
    /// Ping with its payload.
    Ping(Bytes),
    /// Pong with its payload.
    Pong(Bytes),
    /// Close with status and reason.
    Close {
        /// Status code; [`CloseCode::NoStatus`] if none was sent.
        code: CloseCode,
        /// Reason text.
        reason: String,
    },
}

impl Message {
    /// Create a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// The opcode of the first frame carrying this message.
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
            Self::Ping(_) => OpCode::Ping,
            Self::Pong(_) => OpCode::Pong,
            Self::Close { .. } => OpCode::Close,
        }
    }

    /// Check if this is a control message.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.opcode().is_control()
    }

    /// Text payload, for text messages.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Raw payload bytes. Close messages return their reason.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data,
            Self::Close { reason, .. } => reason.as_bytes(),
        }
    }
}

/// Read exactly `buf.len()` bytes, mapping a short read to a transport error.
///
/// `at_boundary` marks the first read of a frame, where a clean EOF means
/// the peer went away rather than truncated a frame.
async fn read_part<R>(reader: &mut R, buf: &mut [u8], at_boundary: bool) -> WebSocketResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match read_fully(reader, buf, ZERO_READ_RETRIES).await? {
        ReadOutcome::Full => Ok(()),
        ReadOutcome::Short(0) if at_boundary => Err(WebSocketError::ConnectionClosed),
        ReadOutcome::Short(n) => Err(WebSocketError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("Frame truncated after {n} of {} bytes", buf.len()),
        ))),
    }
}

/// Check the header fields of a frame whose length is already known.
fn check_header(
    first: u8,
    masked: bool,
    length: u64,
    limits: &FrameLimits,
    role: Role,
) -> WebSocketResult<OpCode> {
    let fin = first & 0x80 != 0;
    let rsv1 = first & 0x40 != 0;
    let opcode = OpCode::try_from(first & 0x0F)?;

    if first & 0x30 != 0 {
        return Err(WebSocketError::Protocol(
            "Reserved bits set without a negotiated extension".to_string(),
        ));
    }
    if rsv1 && (!limits.compression || opcode == OpCode::Continuation || opcode.is_control()) {
        return Err(WebSocketError::Protocol(
            "RSV1 set on a frame that cannot be compressed".to_string(),
        ));
    }

    match (role, masked) {
        (Role::Server, false) => {
            return Err(WebSocketError::Protocol(
                "Client frame is not masked".to_string(),
            ));
        },
        (Role::Client, true) => {
            return Err(WebSocketError::Protocol("Server frame is masked".to_string()));
        },
        _ => {},
    }

    if opcode.is_control() {
        if !fin {
            return Err(WebSocketError::Protocol(
                "Control frame is fragmented".to_string(),
            ));
        }
        if length > MAX_CONTROL_PAYLOAD as u64 {
            return Err(WebSocketError::Protocol(format!(
                "Control frame payload of {length} bytes exceeds {MAX_CONTROL_PAYLOAD}"
            )));
        }
    }

    if length > limits.max_frame_size as u64 {
        return Err(WebSocketError::FrameTooLarge {
            max: limits.max_frame_size,
            actual: length,
        });
    }

    Ok(opcode)
}

/// Read and validate one frame.
///
/// A frame that breaks the rules but fits within `limits.max_frame_size`
/// is consumed before the error is returned, so the next call starts at a
/// frame boundary. Errors for which
/// [`WebSocketError::leaves_stream_desynced`] holds leave the payload unread.
///
/// # Errors
///
/// - [`WebSocketError::ConnectionClosed`] if the stream ends between frames
/// - [`WebSocketError::Protocol`] for masking or reserved-bit violations and
///   fragmented or oversized control frames
/// - [`WebSocketError::InvalidLength`] for a 64-bit length with its top bit set
/// - [`WebSocketError::InvalidFrame`] for a reserved opcode
/// - [`WebSocketError::FrameTooLarge`] past `limits.max_frame_size`
pub async fn read_frame<R>(reader: &mut R, limits: &FrameLimits, role: Role) -> WebSocketResult<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 2];
    read_part(reader, &mut header, true).await?;

    let fin = header[0] & 0x80 != 0;
    let rsv1 = header[0] & 0x40 != 0;
    let rsv2 = header[0] & 0x20 != 0;
    let rsv3 = header[0] & 0x10 != 0;
    let masked = header[1] & 0x80 != 0;

    let length: u64 = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            read_part(reader, &mut ext, false).await?;
            u64::from(from_be_u16(&ext).unwrap_or_default())
        },
        127 => {
            let mut ext = [0u8; 8];
            read_part(reader, &mut ext, false).await?;
            let length = from_be_u64(&ext).unwrap_or_default();
            if length & (1 << 63) != 0 {
                return Err(WebSocketError::InvalidLength(length));
            }
            length
        },
        short => u64::from(short),
    };

    let mask = if masked {
        let mut key = [0u8; 4];
        read_part(reader, &mut key, false).await?;
        Some(key)
    } else {
        None
    };

    let opcode = match check_header(header[0], masked, length, limits, role) {
        Ok(opcode) => opcode,
        Err(e) => {
            if !e.leaves_stream_desynced() {
                let mut rest = (&mut *reader).take(length);
                tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
            }
            return Err(e);
        },
    };

    // Bounded by max_frame_size above.
    let mut payload = vec![0u8; length as usize];
    if !payload.is_empty() {
        read_part(reader, &mut payload, false).await?;
    }
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        mask,
        payload: Bytes::from(payload),
    })
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns any I/O error from the writer.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> WebSocketResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug)]
struct Pending {
    opcode: OpCode,
    compressed: bool,
    data: BytesMut,
}

/// Reassembles fragmented data messages.
///
/// Control frames pass straight through, even between fragments of a data
/// message, without disturbing the message being assembled.
#[derive(Debug)]
pub struct MessageAssembler {
    limits: FrameLimits,
    pending: Option<Pending>,
}

impl MessageAssembler {
    /// Create an assembler with the given limits.
    #[must_use]
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            pending: None,
        }
    }

    /// Returns `true` while a fragmented message is incomplete.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one frame. Returns a message once one is complete.
    ///
    /// # Errors
    ///
    /// Fails on a Continuation without a started message, a new data frame
    /// before the previous message finished, a message over the size limit,
    /// invalid UTF-8 in a text message, or a payload that won't inflate.
    pub fn push(&mut self, frame: Frame) -> WebSocketResult<Option<Message>> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
            OpCode::Close => {
                let (code, reason) = parse_close_payload(&frame.payload)?;
                Ok(Some(Message::Close { code, reason }))
            },
            OpCode::Text | OpCode::Binary => {
                if self.pending.is_some() {
                    return Err(WebSocketError::Protocol(
                        "New data frame before the previous message finished".to_string(),
                    ));
                }
                let pending = Pending {
                    opcode: frame.opcode,
                    compressed: frame.rsv1,
                    data: BytesMut::from(&frame.payload[..]),
                };
                self.check_size(pending.data.len())?;
                if frame.fin {
                    self.finish(pending).map(Some)
                } else {
                    self.pending = Some(pending);
                    Ok(None)
                }
            },
            OpCode::Continuation => {
                let Some(mut pending) = self.pending.take() else {
                    return Err(WebSocketError::Protocol(
                        "Continuation frame without a message to continue".to_string(),
                    ));
                };
                pending.data.extend_from_slice(&frame.payload);
                self.check_size(pending.data.len())?;
                if frame.fin {
                    self.finish(pending).map(Some)
                } else {
                    self.pending = Some(pending);
                    Ok(None)
                }
            },
        }
    }

    fn check_size(&self, size: usize) -> WebSocketResult<()> {
        if size > self.limits.max_message_size {
            return Err(WebSocketError::MessageTooLarge {
                max: self.limits.max_message_size,
                actual: size,
            });
        }
        Ok(())
    }

    fn finish(&self, pending: Pending) -> WebSocketResult<Message> {
        let data = if pending.compressed {
            inflate(&pending.data, self.limits.max_message_size).map_err(|e| {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    WebSocketError::MessageTooLarge {
                        max: self.limits.max_message_size,
                        actual: self.limits.max_message_size.saturating_add(1),
                    }
                } else {
                    WebSocketError::Compression(e.to_string())
                }
            })?
        } else {
            pending.data.freeze()
        };

        match pending.opcode {
            OpCode::Text => String::from_utf8(data.to_vec())
                .map(Message::Text)
                .map_err(|_| WebSocketError::InvalidUtf8),
            _ => Ok(Message::Binary(data)),
        }
    }
}

/// Split a message into frames ready for the wire.
///
/// Data messages longer than `fragment_size` become a first frame plus
/// Continuation frames. When compressing, only the first frame carries
/// RSV1. Client frames get a fresh random mask each.
///
/// # Errors
///
/// Fails for control messages with an oversized payload, a Close with a
/// reserved code, or a compression failure.
pub fn encode_message(message: &Message, options: &EncodeOptions) -> WebSocketResult<Vec<Frame>> {
    let mut frames = match message {
        Message::Ping(payload) => vec![Frame::ping(payload.clone())?],
        Message::Pong(payload) => vec![Frame::pong(payload.clone())?],
        Message::Close { code, reason } => vec![Frame::close(*code, reason)?],
        Message::Text(_) | Message::Binary(_) => {
            let raw = Bytes::copy_from_slice(message.payload());
            let payload = if options.compress { deflate(&raw)? } else { raw };
            fragment(message.opcode(), payload, options)
        },
    };

    if options.role == Role::Client {
        frames = frames
            .into_iter()
            .map(|frame| frame.with_mask(rand::random()))
            .collect();
    }

    Ok(frames)
}

fn fragment(opcode: OpCode, payload: Bytes, options: &EncodeOptions) -> Vec<Frame> {
    let size = options.fragment_size.max(1);
    let mut frames = Vec::with_capacity(payload.len() / size + 1);
    let mut offset = 0;

    loop {
        let end = (offset + size).min(payload.len());
        let first = offset == 0;
        let fin = end == payload.len();

        let mut frame = Frame::new(
            fin,
            if first { opcode } else { OpCode::Continuation },
            payload.slice(offset..end),
        );
        frame.rsv1 = first && options.compress;
        frames.push(frame);

        if fin {
            return frames;
        }
        offset = end;
    }
}
