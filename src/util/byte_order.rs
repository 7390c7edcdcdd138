//! Byte order conversion and bounded reads.

use tokio::io::{AsyncRead, AsyncReadExt};

/// How many consecutive zero-length reads are tolerated before a read is
/// reported as short.
pub const ZERO_READ_RETRIES: usize = 5;

/// Result of [`read_fully`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The whole buffer was filled.
    Full,
    /// The stream stopped delivering data after this many bytes.
    Short(usize),
}

impl ReadOutcome {
    /// Returns `true` if the buffer was filled.
    #[must_use]
    pub fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Encode a `u16` in network byte order.
#[inline]
#[must_use]
pub fn to_be_bytes_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Encode a `u64` in network byte order.
#[inline]
#[must_use]
pub fn to_be_bytes_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a network byte order `u16` from the start of `bytes`.
///
/// Returns `None` if fewer than 2 bytes are available.
#[inline]
#[must_use]
pub fn from_be_u16(bytes: &[u8]) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
    Some(u16::from_be_bytes(raw))
}

/// Decode a network byte order `u64` from the start of `bytes`.
///
/// Returns `None` if fewer than 8 bytes are available.
#[inline]
#[must_use]
pub fn from_be_u64(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

/// Borrow `len` bytes starting at `start`, or `None` if out of range.
#[inline]
#[must_use]
pub fn sub_array(bytes: &[u8], start: usize, len: usize) -> Option<&[u8]> {
    let end = start.checked_add(len)?;
    bytes.get(start..end)
}

/// XOR `payload` in place with `key`, cycling the key by byte index.
///
/// Applying the same key twice restores the original bytes.
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Read until `buf` is full or the stream stops producing data.
///
/// A zero-length read is retried up to `retries` times before giving up,
/// at which point the number of bytes read so far is reported as a short
/// read rather than an error.
///
/// # Errors
///
/// Returns any I/O error raised by the underlying reader.
pub async fn read_fully<R>(
    reader: &mut R,
    buf: &mut [u8],
    retries: usize,
) -> std::io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    let mut zero_reads = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            zero_reads += 1;
            if zero_reads > retries {
                return Ok(ReadOutcome::Short(filled));
            }
            tokio::task::yield_now().await;
            continue;
        }
        filled += n;
    }

    Ok(ReadOutcome::Full)
}
