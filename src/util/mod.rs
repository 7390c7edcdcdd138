//! # Utilities
//!
//! Stateless helpers shared by the HTTP and WebSocket layers.
//!
//! ## Features
//!
//! - Network byte order conversion and sub-array extraction
//! - Payload masking (XOR with a 4-byte key)
//! - Bounded full reads with a zero-read retry policy
//! - Correlation id hashing, HTML escaping, percent decoding
//! - Raw DEFLATE compression helpers for permessage-deflate

mod byte_order;
mod compression;
mod text;

pub use byte_order::{
    apply_mask, from_be_u16, from_be_u64, read_fully, sub_array, to_be_bytes_u16,
    to_be_bytes_u64, ReadOutcome, ZERO_READ_RETRIES,
};
pub use compression::{deflate, inflate};
pub use text::{correlation_id, header_contains, html_escape, is_token, percent_decode};
