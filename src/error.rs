//! QPACK error types and HTTP/3 error code mappings.
//!
//! Errors split into two families: connection-fatal errors raised while
//! processing the encoder or decoder stream (RFC 9204 Section 6), and
//! per-stream header block failures that are delivered to the request
//! stream's visitor as a short stable message.

use std::fmt;
use thiserror::Error;

/// Result type for QPACK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/3 error codes reserved for QPACK, per RFC 9204 Section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ErrorCode {
    /// QPACK_DECOMPRESSION_FAILED (0x0200): the decoder failed to interpret
    /// an encoded field section and cannot continue decoding it.
    QpackDecompressionFailed = 0x0200,

    /// QPACK_ENCODER_STREAM_ERROR (0x0201): the decoder failed to interpret
    /// an encoder instruction received on the encoder stream.
    QpackEncoderStreamError = 0x0201,

    /// QPACK_DECODER_STREAM_ERROR (0x0202): the encoder failed to interpret
    /// a decoder instruction received on the decoder stream.
    QpackDecoderStreamError = 0x0202,
}

impl ErrorCode {
    /// Convert error code to u64 for use in QUIC CONNECTION_CLOSE frames.
    pub fn to_code(self) -> u64 {
        self as u64
    }

    /// Convert from a u64 wire code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x0200 => Some(Self::QpackDecompressionFailed),
            0x0201 => Some(Self::QpackEncoderStreamError),
            0x0202 => Some(Self::QpackDecoderStreamError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QpackDecompressionFailed => write!(f, "H3_QPACK_DECOMPRESSION_FAILED"),
            Self::QpackEncoderStreamError => write!(f, "H3_QPACK_ENCODER_STREAM_ERROR"),
            Self::QpackDecoderStreamError => write!(f, "H3_QPACK_DECODER_STREAM_ERROR"),
        }
    }
}

/// QPACK-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Not enough input to decode a complete value or instruction.
    ///
    /// This is retryable: callers buffer the partial bytes and try again
    /// once more data arrives. It only becomes fatal when the stream ends.
    #[error("need more data")]
    Incomplete,

    /// Decoded integer exceeds 2^62 - 1.
    #[error("prefix integer overflow")]
    IntegerOverflow,

    /// Integer continuation bytes exceed the longest valid encoding.
    #[error("prefix integer encoding too long")]
    IntegerTooLong,

    /// Huffman decoding failure: invalid code, EOS, or bad padding.
    #[error("Huffman decoding error: {0}")]
    Huffman(&'static str),

    /// String literal longer than the configured limit.
    #[error("string literal of {length} bytes exceeds limit of {limit}")]
    StringTooLong { length: u64, limit: u64 },

    /// Fatal error while processing the peer's encoder stream.
    #[error("encoder stream error: {0}")]
    EncoderStream(String),

    /// Fatal error while processing the peer's decoder stream.
    #[error("decoder stream error: {0}")]
    DecoderStream(String),

    /// Reference to a static table index that does not exist.
    #[error("invalid static table index: {0}")]
    InvalidStaticIndex(u64),

    /// Reference to a dynamic table entry that does not exist.
    #[error("invalid dynamic table index: {0}")]
    InvalidDynamicIndex(u64),

    /// Required Insert Count could not be reconstructed from its wire form.
    #[error("invalid required insert count")]
    InvalidRequiredInsertCount,

    /// A single entry larger than the whole dynamic table capacity.
    #[error("entry of size {size} exceeds table capacity {capacity}")]
    EntryTooLarge { size: u64, capacity: u64 },

    /// Set Dynamic Table Capacity above the advertised maximum.
    #[error("capacity {capacity} exceeds maximum {maximum}")]
    CapacityExceedsMaximum { capacity: u64, maximum: u64 },

    /// More streams blocked on pending insertions than the peer allows.
    #[error("blocked stream limit exceeded")]
    BlockedStreamLimitExceeded,

    /// Generic header block decompression failure.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

impl Error {
    /// The HTTP/3 error code a connection would close with for this error.
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            Error::EncoderStream(_) => ErrorCode::QpackEncoderStreamError,
            Error::DecoderStream(_) => ErrorCode::QpackDecoderStreamError,
            _ => ErrorCode::QpackDecompressionFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::QpackDecompressionFailed,
            ErrorCode::QpackEncoderStreamError,
            ErrorCode::QpackDecoderStreamError,
        ] {
            assert_eq!(ErrorCode::from_code(code.to_code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(0x0100), None);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            ErrorCode::QpackEncoderStreamError.to_string(),
            "H3_QPACK_ENCODER_STREAM_ERROR"
        );
    }

    #[test]
    fn test_error_to_code_mapping() {
        assert_eq!(
            Error::EncoderStream("bad".into()).to_error_code(),
            ErrorCode::QpackEncoderStreamError
        );
        assert_eq!(
            Error::DecoderStream("bad".into()).to_error_code(),
            ErrorCode::QpackDecoderStreamError
        );
        assert_eq!(
            Error::IntegerOverflow.to_error_code(),
            ErrorCode::QpackDecompressionFailed
        );
    }
}
