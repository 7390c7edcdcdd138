//! Raw DEFLATE helpers used by permessage-deflate.

use bytes::Bytes;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{self, Write};

/// Tail a sender strips from each message and a receiver restores.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Output buffer growth step while inflating.
const INFLATE_CHUNK: usize = 16 * 1024;

/// Compress `data` as a complete raw DEFLATE stream.
///
/// A single zero byte is appended after the final block so the output ends
/// on a byte boundary the peer's inflater accepts without a context.
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn deflate(data: &[u8]) -> io::Result<Bytes> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(data.len() / 2 + 8),
        Compression::default(),
    );
    encoder.write_all(data)?;
    let mut out = encoder.finish()?;
    out.push(0x00);
    Ok(Bytes::from(out))
}

/// Inflate a permessage-deflate payload.
///
/// The stripped `00 00 ff ff` tail is restored and the input is decoded
/// with a sync flush, so messages that end without a final block (what
/// browsers send) inflate completely. Output beyond `limit` bytes is an
/// error.
///
/// # Errors
///
/// Returns `InvalidInput` for a corrupt stream and `InvalidData` for output
/// larger than `limit`.
pub fn inflate(data: &[u8], limit: usize) -> io::Result<Bytes> {
    let mut input = Vec::with_capacity(data.len() + DEFLATE_TAIL.len());
    input.extend_from_slice(data);
    input.extend_from_slice(&DEFLATE_TAIL);

    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity((data.len() * 2).min(limit.saturating_add(1)));

    loop {
        if out.capacity() - out.len() < INFLATE_CHUNK {
            out.reserve(INFLATE_CHUNK);
        }
        let in_before = inflater.total_in();
        let out_before = inflater.total_out();
        let offset = usize::try_from(in_before).map_or(input.len(), |n| n.min(input.len()));

        let status = inflater
            .decompress_vec(&input[offset..], &mut out, FlushDecompress::Sync)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        if out.len() > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("inflated payload exceeds {limit} bytes"),
            ));
        }
        if status == Status::StreamEnd {
            break;
        }

        let consumed_all = inflater.total_in() >= input.len() as u64;
        if consumed_all && out.len() < out.capacity() {
            break;
        }
        if inflater.total_in() == in_before && inflater.total_out() == out_before {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "deflate stream made no progress",
            ));
        }
    }

    Ok(Bytes::from(out))
}
