//! Prefix integer encoding and decoding.
//!
//! Implements the variable-length integer encoding defined in RFC 7541
//! Section 5.1, used for every numeric field in QPACK. An integer is
//! represented as an N-bit prefix (1 ≤ N ≤ 8) sharing its byte with other
//! flags, followed by continuation bytes when the value does not fit.
//!
//! If I < 2^N - 1, the integer is encoded entirely in the prefix.
//! Otherwise the prefix bits are all ones and the remainder follows in
//! little-endian 7-bit groups, bit 7 of each byte flagging continuation.
//!
//! RFC 9204 Section 4.1.1 caps values at 2^62 - 1.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Largest encodable value (2^62 - 1).
pub const MAX_VALUE: u64 = (1u64 << 62) - 1;

/// Encodes `value` with an N-bit prefix, preserving `high_bits` in the
/// bits above the prefix.
///
/// # Panics
///
/// Panics if `prefix_bits` is outside 1..=8, `value` exceeds [`MAX_VALUE`],
/// or `high_bits` overlaps the prefix. These are internal contract
/// violations, not wire conditions.
pub fn encode(value: u64, prefix_bits: u8, high_bits: u8, buf: &mut BytesMut) {
    assert!((1..=8).contains(&prefix_bits), "prefix_bits must be 1-8");
    assert!(value <= MAX_VALUE, "value exceeds 2^62 - 1");

    let max_prefix = if prefix_bits == 8 {
        0xff
    } else {
        (1u8 << prefix_bits) - 1
    };
    assert_eq!(high_bits & max_prefix, 0, "high_bits overlap the prefix");

    if value < u64::from(max_prefix) {
        buf.put_u8(high_bits | value as u8);
        return;
    }

    buf.put_u8(high_bits | max_prefix);
    let mut remaining = value - u64::from(max_prefix);
    while remaining >= 128 {
        buf.put_u8((remaining & 0x7f) as u8 | 0x80);
        remaining >>= 7;
    }
    buf.put_u8(remaining as u8);
}

/// Decodes an integer with an N-bit prefix from the front of `data`.
///
/// Returns the value and the number of bytes consumed, or
/// [`Error::Incomplete`] if the encoding continues past the end of `data`.
pub fn decode(prefix_bits: u8, data: &[u8]) -> Result<(u64, usize)> {
    assert!((1..=8).contains(&prefix_bits), "prefix_bits must be 1-8");

    let first = *data.first().ok_or(Error::Incomplete)?;
    let mask = if prefix_bits == 8 {
        0xff
    } else {
        (1u8 << prefix_bits) - 1
    };

    let mut value = u64::from(first & mask);
    if value < u64::from(mask) {
        return Ok((value, 1));
    }

    let mut pos = 1;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(pos).ok_or(Error::Incomplete)?;
        pos += 1;

        // Ten continuation bytes cover 70 payload bits, more than the
        // 62-bit cap allows; anything longer is not a valid encoding.
        if shift > 63 {
            return Err(Error::IntegerTooLong);
        }

        let group = u64::from(byte & 0x7f);
        let contribution = group.checked_shl(shift).ok_or(Error::IntegerOverflow)?;
        if shift > 0 && contribution >> shift != group {
            return Err(Error::IntegerOverflow);
        }

        value = value.checked_add(contribution).ok_or(Error::IntegerOverflow)?;
        if value > MAX_VALUE {
            return Err(Error::IntegerOverflow);
        }

        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u64, prefix_bits: u8, high_bits: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        encode(value, prefix_bits, high_bits, &mut buf);
        buf
    }

    #[test]
    fn test_rfc_example_10() {
        // RFC 7541 Section C.1.1: 10 with a 5-bit prefix.
        let buf = encoded(10, 5, 0);
        assert_eq!(&buf[..], &[0b0000_1010]);
    }

    #[test]
    fn test_rfc_example_1337() {
        // RFC 7541 Section C.1.2: 1337 with a 5-bit prefix.
        let buf = encoded(1337, 5, 0);
        assert_eq!(&buf[..], &[0x1f, 0x9a, 0x0a]);

        let (value, consumed) = decode(5, &buf).unwrap();
        assert_eq!(value, 1337);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_rfc_example_42() {
        // RFC 7541 Section C.1.3: 42 with an 8-bit prefix.
        let buf = encoded(42, 8, 0);
        assert_eq!(&buf[..], &[42]);
    }

    #[test]
    fn test_high_bits_preserved() {
        let buf = encoded(10, 5, 0b0010_0000);
        assert_eq!(buf[0], 0b0010_1010);
        let (value, _) = decode(5, &buf).unwrap();
        assert_eq!(value, 10);
    }

    #[test]
    fn test_boundary_values() {
        for prefix_bits in 1..=8u8 {
            let max_prefix = if prefix_bits == 8 {
                255u64
            } else {
                (1u64 << prefix_bits) - 1
            };
            for value in [0, max_prefix - 1, max_prefix, max_prefix + 1, MAX_VALUE] {
                let buf = encoded(value, prefix_bits, 0);
                let (decoded, consumed) = decode(prefix_bits, &buf).unwrap();
                assert_eq!(decoded, value, "prefix_bits={prefix_bits}");
                assert_eq!(consumed, buf.len());
            }
        }
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode(5, &[]), Err(Error::Incomplete));
        // Prefix all ones promises continuation bytes that never arrive.
        assert_eq!(decode(5, &[0x1f]), Err(Error::Incomplete));
        assert_eq!(decode(5, &[0x1f, 0x80]), Err(Error::Incomplete));
    }

    #[test]
    fn test_overflow_rejected() {
        // 2^62 exactly: one past the cap.
        let data = [0xff, 0x81, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x3e];
        assert!(decode(8, &data).is_err());

        // Endless continuation bytes.
        let data = [0xff; 16];
        assert!(decode(8, &data).is_err());
    }

    #[test]
    fn test_round_trip_property() {
        use proptest::prelude::*;

        proptest!(|(value in 0u64..=MAX_VALUE, prefix_bits in 1u8..=8)| {
            let buf = encoded(value, prefix_bits, 0);
            let (decoded, consumed) = decode(prefix_bits, &buf).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buf.len());
        });
    }
}
