//! Decoded headers accumulator.
//!
//! The per-request adapter between a stream of encoded bytes and a
//! finished header list. It owns the progressive decoder; the decoder's
//! blocked-stream registry keeps only a weak handle back, so dropping the
//! accumulator drops the whole per-request state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::header_list::HeaderList;
use crate::progressive::ProgressiveDecoder;

/// Terminal callback for one request stream's header block.
///
/// Exactly one of the two methods fires per accumulator, possibly from
/// within [`decode`](DecodedHeadersAccumulator::decode) or
/// [`end_header_block`](DecodedHeadersAccumulator::end_header_block), or
/// later from the connection's encoder stream processing when the block
/// was blocked on dynamic table insertions.
pub trait Visitor {
    /// The block decoded successfully. An over-limit list arrives as the
    /// empty sentinel with zero byte counters.
    fn on_headers_decoded(&mut self, headers: HeaderList);

    /// Decoding failed; `message` is a short stable description. The
    /// stream should be reset with `HTTP_QPACK_DECOMPRESSION_FAILED`.
    fn on_header_decoding_error(&mut self, message: &str);
}

/// Accumulates encoded bytes for one request stream and reports the
/// outcome through its [`Visitor`].
pub struct DecodedHeadersAccumulator {
    decoder: Rc<RefCell<ProgressiveDecoder>>,
}

impl DecodedHeadersAccumulator {
    pub(crate) fn new(decoder: Rc<RefCell<ProgressiveDecoder>>) -> Self {
        Self { decoder }
    }

    /// Feeds header block bytes in arrival order. May synchronously fire
    /// the visitor; after that the accumulator is inert.
    pub fn decode(&mut self, data: &[u8]) {
        self.decoder.borrow_mut().decode(data);
    }

    /// Closes the block. Safe to call with no bytes fed; a still-blocked
    /// block defers its terminal callback to the eventual unblock.
    pub fn end_header_block(&mut self) {
        self.decoder.borrow_mut().end_header_block();
    }

    /// Whether the block is waiting on dynamic table insertions.
    pub fn is_blocked(&self) -> bool {
        self.decoder.borrow().is_blocked()
    }
}
