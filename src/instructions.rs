//! Encoder and decoder stream instructions (RFC 9204 Section 4.3).
//!
//! Each instruction is identified by opcode bits at the high end of its
//! first byte; decoding dispatches on the masked first byte, encoding
//! writes the opcode as the high bits of the leading prefix integer.
//!
//! Encoder stream (encoder → decoder):
//! - `001xxxxx` Set Dynamic Table Capacity
//! - `1Txxxxxx` Insert With Name Reference (T=1 static)
//! - `01Hxxxxx` Insert Without Name Reference
//! - `000xxxxx` Duplicate
//!
//! Decoder stream (decoder → encoder):
//! - `1xxxxxxx` Section Acknowledgement
//! - `01xxxxxx` Stream Cancellation
//! - `00xxxxxx` Insert Count Increment

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{prefix_int, string_codec};

/// Instructions flowing on the encoder stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// `001` | capacity (5-bit prefix).
    SetDynamicTableCapacity { capacity: u64 },

    /// `1T` | name index (6-bit prefix) | value string.
    InsertWithNameRef {
        is_static: bool,
        name_index: u64,
        value: Bytes,
    },

    /// `01H` | name length (5-bit prefix) | name | value string.
    InsertWithLiteralName { name: Bytes, value: Bytes },

    /// `000` | relative index (5-bit prefix).
    Duplicate { index: u64 },
}

impl EncoderInstruction {
    /// Serialises the instruction, appending to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            EncoderInstruction::SetDynamicTableCapacity { capacity } => {
                prefix_int::encode(*capacity, 5, 0b0010_0000, buf);
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let opcode = if *is_static { 0b1100_0000 } else { 0b1000_0000 };
                prefix_int::encode(*name_index, 6, opcode, buf);
                string_codec::encode(value, 7, 0, buf);
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                string_codec::encode(name, 5, 0b0100_0000, buf);
                string_codec::encode(value, 7, 0, buf);
            }
            EncoderInstruction::Duplicate { index } => {
                prefix_int::encode(*index, 5, 0, buf);
            }
        }
    }

    /// Decodes one instruction from the front of `data`, returning it and
    /// the bytes consumed. [`Error::Incomplete`] means a partial
    /// instruction: retry with more data.
    pub fn decode(data: &[u8], max_string_length: u64) -> Result<(Self, usize)> {
        let first = *data.first().ok_or(Error::Incomplete)?;

        if first & 0b1000_0000 != 0 {
            let is_static = first & 0b0100_0000 != 0;
            let (name_index, mut pos) = prefix_int::decode(6, data)?;
            let (value, consumed) =
                string_codec::decode(&data[pos..], 7, max_string_length)?;
            pos += consumed;
            Ok((
                EncoderInstruction::InsertWithNameRef {
                    is_static,
                    name_index,
                    value,
                },
                pos,
            ))
        } else if first & 0b0100_0000 != 0 {
            let (name, mut pos) = string_codec::decode(data, 5, max_string_length)?;
            let (value, consumed) =
                string_codec::decode(&data[pos..], 7, max_string_length)?;
            pos += consumed;
            Ok((EncoderInstruction::InsertWithLiteralName { name, value }, pos))
        } else if first & 0b0010_0000 != 0 {
            let (capacity, pos) = prefix_int::decode(5, data)?;
            Ok((EncoderInstruction::SetDynamicTableCapacity { capacity }, pos))
        } else {
            let (index, pos) = prefix_int::decode(5, data)?;
            Ok((EncoderInstruction::Duplicate { index }, pos))
        }
    }
}

/// Instructions flowing on the decoder stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInstruction {
    /// `1` | stream id (7-bit prefix).
    SectionAcknowledgement { stream_id: u64 },

    /// `01` | stream id (6-bit prefix).
    StreamCancellation { stream_id: u64 },

    /// `00` | increment (6-bit prefix).
    InsertCountIncrement { increment: u64 },
}

impl DecoderInstruction {
    /// Serialises the instruction, appending to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            DecoderInstruction::SectionAcknowledgement { stream_id } => {
                prefix_int::encode(*stream_id, 7, 0b1000_0000, buf);
            }
            DecoderInstruction::StreamCancellation { stream_id } => {
                prefix_int::encode(*stream_id, 6, 0b0100_0000, buf);
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                prefix_int::encode(*increment, 6, 0, buf);
            }
        }
    }

    /// Decodes one instruction from the front of `data`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let first = *data.first().ok_or(Error::Incomplete)?;

        if first & 0b1000_0000 != 0 {
            let (stream_id, pos) = prefix_int::decode(7, data)?;
            Ok((DecoderInstruction::SectionAcknowledgement { stream_id }, pos))
        } else if first & 0b0100_0000 != 0 {
            let (stream_id, pos) = prefix_int::decode(6, data)?;
            Ok((DecoderInstruction::StreamCancellation { stream_id }, pos))
        } else {
            let (increment, pos) = prefix_int::decode(6, data)?;
            Ok((DecoderInstruction::InsertCountIncrement { increment }, pos))
        }
    }
}
