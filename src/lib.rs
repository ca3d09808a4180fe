//! QPACK: field compression for HTTP/3 (RFC 9204).
//!
//! QPACK compresses HTTP field sections over three kinds of QUIC streams:
//! the encoder stream carrying dynamic table updates, the decoder stream
//! carrying acknowledgements, and the request streams carrying encoded
//! field sections. Unlike HPACK, the shared table updates and the header
//! blocks referencing them may arrive reordered; decoding tolerates this
//! by blocking individual request streams (never the connection) until the
//! required insertions arrive.
//!
//! # Architecture
//!
//! - [`Encoder`]: one per connection. Turns header lists into encoded
//!   field sections, emitting table updates on the encoder stream and
//!   consuming the peer's decoder stream.
//! - [`Decoder`]: one per connection. Owns the dynamic table, consumes the
//!   peer's encoder stream, and hands out one
//!   [`DecodedHeadersAccumulator`] per request stream.
//! - The transport is abstracted behind [`StreamSender`] (ordered reliable
//!   writes) and [`ConnectionErrorSink`] (fatal protocol errors); request
//!   streams observe results through a [`Visitor`].
//!
//! All components of one connection run single-threaded on that
//! connection's task; there is no internal locking.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use quill_qpack::{
//!     ConnectionErrorSink, Decoder, Encoder, ErrorCode, FieldLine,
//!     HeaderList, QpackSettings, Visitor,
//! };
//!
//! struct Sink;
//! impl ConnectionErrorSink for Sink {
//!     fn fail(&mut self, code: ErrorCode, reason: &str) {
//!         panic!("connection error {code}: {reason}");
//!     }
//! }
//!
//! struct Collect(Rc<RefCell<Option<HeaderList>>>);
//! impl Visitor for Collect {
//!     fn on_headers_decoded(&mut self, headers: HeaderList) {
//!         *self.0.borrow_mut() = Some(headers);
//!     }
//!     fn on_header_decoding_error(&mut self, message: &str) {
//!         panic!("decoding error: {message}");
//!     }
//! }
//!
//! let mut encoder = Encoder::new(Box::new(Sink));
//! let mut decoder = Decoder::new(QpackSettings::default(), Box::new(Sink));
//!
//! let headers = vec![
//!     FieldLine::new(":method", "GET"),
//!     FieldLine::new(":path", "/"),
//! ];
//! let block = encoder.encode_header_list(0, &headers);
//!
//! let decoded = Rc::new(RefCell::new(None));
//! let mut accumulator = decoder.create_progressive_decoder(
//!     0,
//!     Box::new(Collect(decoded.clone())),
//!     16 * 1024,
//! );
//! accumulator.decode(&block);
//! accumulator.end_header_block();
//!
//! let decoded = decoded.borrow_mut().take().unwrap();
//! assert_eq!(decoded.fields(), &headers[..]);
//! ```

pub mod accumulator;
pub mod blocked_streams;
pub mod config;
pub mod decoder;
pub mod decoder_stream;
pub mod dynamic_table;
pub mod encoder;
pub mod encoder_stream;
pub mod error;
pub mod header_block;
pub mod header_list;
pub mod huffman;
pub mod instructions;
pub mod prefix_int;
pub mod progressive;
pub mod static_table;
pub mod string_codec;

pub use accumulator::{DecodedHeadersAccumulator, Visitor};
pub use config::QpackSettings;
pub use decoder::Decoder;
pub use dynamic_table::DynamicTable;
pub use encoder::{should_never_index, Encoder};
pub use error::{Error, ErrorCode, Result};
pub use header_list::{FieldLine, HeaderList};

/// Reliable, ordered writer for one unidirectional stream.
///
/// Implemented by the HTTP/3 layer over its QUIC send streams. QPACK only
/// appends; it never closes or resets the stream.
pub trait StreamSender {
    fn write_stream_data(&mut self, data: &[u8]);
}

/// Channel for connection-fatal protocol errors.
///
/// The encoder reports decoder stream errors here with
/// [`ErrorCode::QpackDecoderStreamError`]; the decoder reports encoder
/// stream errors with [`ErrorCode::QpackEncoderStreamError`]. The
/// reporting component goes inert after the first call.
pub trait ConnectionErrorSink {
    fn fail(&mut self, code: ErrorCode, reason: &str);
}
