//! Encoded field section format (RFC 9204 Section 4.5).
//!
//! A header block is a prefix (Required Insert Count and Base) followed by
//! field line representations:
//!
//! - `1T` Indexed Field Line (T=1 static; dynamic is relative to Base)
//! - `0001` Indexed Field Line With Post-Base Index
//! - `01NT` Literal Field Line With Name Reference
//! - `0000N` Literal Field Line With Post-Base Name Reference
//! - `001NH` Literal Field Line With Literal Name

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{prefix_int, string_codec};

/// Decoded header block prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBlockPrefix {
    pub required_insert_count: u64,
    pub base: u64,
}

impl HeaderBlockPrefix {
    /// Serialises the prefix. `max_entries` is
    /// `maximum_dynamic_table_capacity / 32`, fixed by settings.
    pub fn encode(&self, max_entries: u64, buf: &mut BytesMut) {
        debug_assert!(
            self.required_insert_count == 0 || max_entries > 0,
            "dynamic references require a non-zero table"
        );
        let encoded_ric = if self.required_insert_count == 0 {
            0
        } else {
            self.required_insert_count % (2 * max_entries) + 1
        };
        prefix_int::encode(encoded_ric, 8, 0, buf);

        if self.base >= self.required_insert_count {
            prefix_int::encode(self.base - self.required_insert_count, 7, 0, buf);
        } else {
            prefix_int::encode(
                self.required_insert_count - self.base - 1,
                7,
                0b1000_0000,
                buf,
            );
        }
    }

    /// Decodes a prefix from the front of `data`.
    ///
    /// Required Insert Count reconstruction follows RFC 9204 Section
    /// 4.5.1.1, anchored on the decoder's current total insert count.
    pub fn decode(
        data: &[u8],
        max_entries: u64,
        total_inserted: u64,
    ) -> Result<(Self, usize)> {
        let (encoded_ric, mut pos) = prefix_int::decode(8, data)?;

        let required_insert_count = if encoded_ric == 0 {
            0
        } else {
            let full_range = 2 * max_entries;
            if full_range == 0 || encoded_ric > full_range {
                return Err(Error::InvalidRequiredInsertCount);
            }

            let max_value = total_inserted + max_entries;
            let max_wrapped = (max_value / full_range) * full_range;
            let mut reconstructed = max_wrapped + encoded_ric - 1;

            if reconstructed > max_value {
                if reconstructed <= full_range {
                    return Err(Error::InvalidRequiredInsertCount);
                }
                reconstructed -= full_range;
            }
            if reconstructed == 0 {
                return Err(Error::InvalidRequiredInsertCount);
            }
            reconstructed
        };

        let sign = *data.get(pos).ok_or(Error::Incomplete)? & 0b1000_0000 != 0;
        let (delta_base, consumed) = prefix_int::decode(7, &data[pos..])?;
        pos += consumed;

        let base = if sign {
            // Base = RIC - delta - 1; a delta at or past RIC is invalid.
            required_insert_count
                .checked_sub(delta_base + 1)
                .ok_or(Error::InvalidRequiredInsertCount)?
        } else {
            required_insert_count + delta_base
        };

        Ok((
            HeaderBlockPrefix {
                required_insert_count,
                base,
            },
            pos,
        ))
    }
}

/// One field line representation as it appears on the wire. Dynamic table
/// indices are unresolved: relative to Base or post-Base as encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLineRepr {
    /// `1T` | index (6-bit prefix), T=1.
    IndexedStatic { index: u64 },

    /// `1T` | relative index (6-bit prefix), T=0.
    IndexedDynamic { relative_index: u64 },

    /// `0001` | post-Base index (4-bit prefix).
    IndexedPostBase { index: u64 },

    /// `01NT` | name index (4-bit prefix) | value string, T=1.
    LiteralStaticNameRef {
        name_index: u64,
        value: Bytes,
        never_indexed: bool,
    },

    /// `01NT` | relative name index (4-bit prefix) | value string, T=0.
    LiteralDynamicNameRef {
        relative_index: u64,
        value: Bytes,
        never_indexed: bool,
    },

    /// `0000N` | post-Base name index (3-bit prefix) | value string.
    LiteralPostBaseNameRef {
        index: u64,
        value: Bytes,
        never_indexed: bool,
    },

    /// `001NH` | name length (3-bit prefix) | name | value string.
    LiteralWithLiteralName {
        name: Bytes,
        value: Bytes,
        never_indexed: bool,
    },
}

impl FieldLineRepr {
    /// Serialises the representation, appending to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            FieldLineRepr::IndexedStatic { index } => {
                prefix_int::encode(*index, 6, 0b1100_0000, buf);
            }
            FieldLineRepr::IndexedDynamic { relative_index } => {
                prefix_int::encode(*relative_index, 6, 0b1000_0000, buf);
            }
            FieldLineRepr::IndexedPostBase { index } => {
                prefix_int::encode(*index, 4, 0b0001_0000, buf);
            }
            FieldLineRepr::LiteralStaticNameRef {
                name_index,
                value,
                never_indexed,
            } => {
                let opcode = 0b0101_0000 | (u8::from(*never_indexed) << 5);
                prefix_int::encode(*name_index, 4, opcode, buf);
                string_codec::encode(value, 7, 0, buf);
            }
            FieldLineRepr::LiteralDynamicNameRef {
                relative_index,
                value,
                never_indexed,
            } => {
                let opcode = 0b0100_0000 | (u8::from(*never_indexed) << 5);
                prefix_int::encode(*relative_index, 4, opcode, buf);
                string_codec::encode(value, 7, 0, buf);
            }
            FieldLineRepr::LiteralPostBaseNameRef {
                index,
                value,
                never_indexed,
            } => {
                let opcode = u8::from(*never_indexed) << 3;
                prefix_int::encode(*index, 3, opcode, buf);
                string_codec::encode(value, 7, 0, buf);
            }
            FieldLineRepr::LiteralWithLiteralName {
                name,
                value,
                never_indexed,
            } => {
                let opcode = 0b0010_0000 | (u8::from(*never_indexed) << 4);
                string_codec::encode(name, 3, opcode, buf);
                string_codec::encode(value, 7, 0, buf);
            }
        }
    }

    /// Decodes one representation from the front of `data`.
    pub fn decode(data: &[u8], max_string_length: u64) -> Result<(Self, usize)> {
        let first = *data.first().ok_or(Error::Incomplete)?;

        if first & 0b1000_0000 != 0 {
            let (index, pos) = prefix_int::decode(6, data)?;
            if first & 0b0100_0000 != 0 {
                Ok((FieldLineRepr::IndexedStatic { index }, pos))
            } else {
                Ok((
                    FieldLineRepr::IndexedDynamic {
                        relative_index: index,
                    },
                    pos,
                ))
            }
        } else if first & 0b0100_0000 != 0 {
            let never_indexed = first & 0b0010_0000 != 0;
            let is_static = first & 0b0001_0000 != 0;
            let (index, mut pos) = prefix_int::decode(4, data)?;
            let (value, consumed) =
                string_codec::decode(&data[pos..], 7, max_string_length)?;
            pos += consumed;
            if is_static {
                Ok((
                    FieldLineRepr::LiteralStaticNameRef {
                        name_index: index,
                        value,
                        never_indexed,
                    },
                    pos,
                ))
            } else {
                Ok((
                    FieldLineRepr::LiteralDynamicNameRef {
                        relative_index: index,
                        value,
                        never_indexed,
                    },
                    pos,
                ))
            }
        } else if first & 0b0010_0000 != 0 {
            let never_indexed = first & 0b0001_0000 != 0;
            let (name, mut pos) = string_codec::decode(data, 3, max_string_length)?;
            let (value, consumed) =
                string_codec::decode(&data[pos..], 7, max_string_length)?;
            pos += consumed;
            Ok((
                FieldLineRepr::LiteralWithLiteralName {
                    name,
                    value,
                    never_indexed,
                },
                pos,
            ))
        } else if first & 0b0001_0000 != 0 {
            let (index, pos) = prefix_int::decode(4, data)?;
            Ok((FieldLineRepr::IndexedPostBase { index }, pos))
        } else {
            let never_indexed = first & 0b0000_1000 != 0;
            let (index, mut pos) = prefix_int::decode(3, data)?;
            let (value, consumed) =
                string_codec::decode(&data[pos..], 7, max_string_length)?;
            pos += consumed;
            Ok((
                FieldLineRepr::LiteralPostBaseNameRef {
                    index,
                    value,
                    never_indexed,
                },
                pos,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_LIMIT: u64 = u64::MAX;

    #[test]
    fn test_prefix_zero() {
        let prefix = HeaderBlockPrefix {
            required_insert_count: 0,
            base: 0,
        };
        let mut buf = BytesMut::new();
        prefix.encode(3, &mut buf);
        assert_eq!(&buf[..], &[0x00, 0x00]);

        let (decoded, consumed) = HeaderBlockPrefix::decode(&buf, 3, 0).unwrap();
        assert_eq!(decoded, prefix);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_prefix_wire_example() {
        // MaxEntries 3 (capacity 100): RIC 1 encodes as 2, Base 1 as
        // sign 0 delta 0.
        let prefix = HeaderBlockPrefix {
            required_insert_count: 1,
            base: 1,
        };
        let mut buf = BytesMut::new();
        prefix.encode(3, &mut buf);
        assert_eq!(&buf[..], &[0x02, 0x00]);

        let (decoded, _) = HeaderBlockPrefix::decode(&buf, 3, 0).unwrap();
        assert_eq!(decoded.required_insert_count, 1);
        assert_eq!(decoded.base, 1);
    }

    #[test]
    fn test_prefix_negative_base() {
        // Base below RIC uses the sign bit.
        let prefix = HeaderBlockPrefix {
            required_insert_count: 6,
            base: 2,
        };
        let mut buf = BytesMut::new();
        prefix.encode(100, &mut buf);
        assert_eq!(&buf[..], &[0x07, 0x83]);

        let (decoded, _) = HeaderBlockPrefix::decode(&buf, 100, 6).unwrap();
        assert_eq!(decoded, prefix);
    }

    #[test]
    fn test_prefix_round_trip_with_wrapping() {
        // Large insert counts force the modulo arithmetic through its
        // wrap-around branch.
        let max_entries = 3u64;
        for total_inserted in 0..40u64 {
            for ric in
                total_inserted.saturating_sub(max_entries - 1)..=total_inserted
            {
                let prefix = HeaderBlockPrefix {
                    required_insert_count: ric,
                    base: ric,
                };
                let mut buf = BytesMut::new();
                prefix.encode(max_entries, &mut buf);
                let (decoded, _) =
                    HeaderBlockPrefix::decode(&buf, max_entries, total_inserted)
                        .unwrap();
                assert_eq!(
                    decoded.required_insert_count, ric,
                    "total_inserted={total_inserted}"
                );
            }
        }
    }

    #[test]
    fn test_prefix_ric_without_table_rejected() {
        // Non-zero encoded RIC with MaxEntries 0 cannot reconstruct.
        assert!(matches!(
            HeaderBlockPrefix::decode(&[0x01, 0x00], 0, 0),
            Err(Error::InvalidRequiredInsertCount)
        ));
    }

    #[test]
    fn test_field_line_round_trips() {
        let reprs = [
            FieldLineRepr::IndexedStatic { index: 17 },
            FieldLineRepr::IndexedDynamic { relative_index: 0 },
            FieldLineRepr::IndexedPostBase { index: 4 },
            FieldLineRepr::LiteralStaticNameRef {
                name_index: 1,
                value: Bytes::from_static(b"/index.html"),
                never_indexed: false,
            },
            FieldLineRepr::LiteralDynamicNameRef {
                relative_index: 7,
                value: Bytes::from_static(b"x"),
                never_indexed: true,
            },
            FieldLineRepr::LiteralPostBaseNameRef {
                index: 2,
                value: Bytes::from_static(b"y"),
                never_indexed: false,
            },
            FieldLineRepr::LiteralWithLiteralName {
                name: Bytes::from_static(b"custom-key"),
                value: Bytes::from_static(b"custom-value"),
                never_indexed: true,
            },
        ];
        for repr in reprs {
            let mut buf = BytesMut::new();
            repr.encode(&mut buf);
            let (decoded, consumed) = FieldLineRepr::decode(&buf, NO_LIMIT).unwrap();
            assert_eq!(decoded, repr);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_indexed_static_wire_format() {
        let mut buf = BytesMut::new();
        FieldLineRepr::IndexedStatic { index: 17 }.encode(&mut buf);
        assert_eq!(&buf[..], &[0xd1]);
    }

    #[test]
    fn test_indexed_dynamic_wire_format() {
        let mut buf = BytesMut::new();
        FieldLineRepr::IndexedDynamic { relative_index: 0 }.encode(&mut buf);
        assert_eq!(&buf[..], &[0x80]);
    }
}
