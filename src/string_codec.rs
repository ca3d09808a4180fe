//! String literal encoding and decoding.
//!
//! A string literal is a length (prefix integer) followed by that many
//! bytes, with a Huffman flag one bit above the length prefix. Instructions
//! embed string literals at different prefix widths, so both directions are
//! parameterised on the prefix and on the bits already occupying the high
//! end of the first byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{huffman, prefix_int};

/// Encodes `data` as a string literal with an N-bit length prefix,
/// preserving `high_bits` above the Huffman flag.
///
/// The Huffman flag (bit N of the first byte) is set whenever the Huffman
/// form is strictly shorter than the raw bytes.
pub fn encode(data: &[u8], prefix_bits: u8, high_bits: u8, buf: &mut BytesMut) {
    debug_assert!(prefix_bits <= 7, "Huffman flag must fit in the first byte");
    let huffman_flag = 1u8 << prefix_bits;

    let huffman_len = huffman::encoded_size(data);
    if huffman_len < data.len() {
        prefix_int::encode(huffman_len as u64, prefix_bits, high_bits | huffman_flag, buf);
        let mut encoded = Vec::with_capacity(huffman_len);
        huffman::encode(data, &mut encoded);
        buf.put_slice(&encoded);
    } else {
        prefix_int::encode(data.len() as u64, prefix_bits, high_bits, buf);
        buf.put_slice(data);
    }
}

/// Decodes a string literal with an N-bit length prefix from the front of
/// `data`.
///
/// Returns the decoded bytes and the number of wire bytes consumed.
/// `limit` bounds the on-wire length; longer literals are rejected before
/// any buffering.
pub fn decode(data: &[u8], prefix_bits: u8, limit: u64) -> Result<(Bytes, usize)> {
    debug_assert!(prefix_bits <= 7, "Huffman flag must fit in the first byte");

    let first = *data.first().ok_or(Error::Incomplete)?;
    let huffman_encoded = first & (1u8 << prefix_bits) != 0;

    let (length, consumed) = prefix_int::decode(prefix_bits, data)?;
    if length > limit {
        return Err(Error::StringTooLong { length, limit });
    }
    let length = length as usize;

    if data.len() - consumed < length {
        return Err(Error::Incomplete);
    }
    let payload = &data[consumed..consumed + length];

    let decoded = if huffman_encoded {
        // Huffman never compresses below 5 bits per symbol, so the decoded
        // form is at most 8/5 the wire length.
        let mut out = Vec::with_capacity(length * 8 / 5 + 1);
        huffman::decode(payload, &mut out)?;
        if out.len() as u64 > limit {
            return Err(Error::StringTooLong {
                length: out.len() as u64,
                limit,
            });
        }
        Bytes::from(out)
    } else {
        Bytes::copy_from_slice(payload)
    };

    Ok((decoded, consumed + length))
}
