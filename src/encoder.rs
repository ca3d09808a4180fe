//! Per-connection QPACK encoder.
//!
//! Turns header lists into encoded field sections, choosing per field
//! between static matches, dynamic table references, fresh insertions on
//! the encoder stream, and literals. Reference safety rules:
//!
//! - never reference an entry in the draining zone (about to be evicted);
//!   duplicate it instead when insertion headroom allows,
//! - never let an insertion evict an entry the peer has not acknowledged
//!   or that an in-flight header block still references,
//! - never let more streams reference unacknowledged insertions than
//!   SETTINGS_QPACK_BLOCKED_STREAMS allows; past the budget the encoder
//!   degrades to acknowledged references and literals.
//!
//! Sensitive fields (authorization, cookies, tokens) are emitted as
//! never-indexed literals and are kept out of the dynamic table.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::QpackSettings;
use crate::decoder_stream::DecoderStreamReceiver;
use crate::dynamic_table::DynamicTable;
use crate::encoder_stream::EncoderStreamSender;
use crate::error::{Error, ErrorCode, Result};
use crate::header_block::{FieldLineRepr, HeaderBlockPrefix};
use crate::header_list::FieldLine;
use crate::instructions::DecoderInstruction;
use crate::{static_table, ConnectionErrorSink, StreamSender};

/// A header block sent but not yet acknowledged or cancelled.
struct OutstandingBlock {
    required_insert_count: u64,
    /// Smallest absolute index the block references; entries at or above
    /// it must survive until the block is acknowledged.
    lowest_ref: u64,
}

/// Field line with dynamic references still absolute; converted to
/// relative/post-Base form once the block's Base is final.
enum Line {
    Indexed(FieldLineRepr),
    IndexedDynamic { absolute_index: u64 },
    LiteralDynamicName {
        absolute_index: u64,
        value: Bytes,
        never_indexed: bool,
    },
}

/// QPACK encoder for one HTTP/3 connection.
pub struct Encoder {
    table: DynamicTable,
    encoder_stream: EncoderStreamSender,
    decoder_stream_receiver: DecoderStreamReceiver,
    maximum_blocked_streams: u64,
    /// Unacknowledged header blocks per request stream, oldest first.
    outstanding: HashMap<u64, VecDeque<OutstandingBlock>>,
    error_sink: Box<dyn ConnectionErrorSink>,
    failed: bool,
}

impl Encoder {
    /// Creates an encoder with a zero-capacity table. Peer settings raise
    /// the limits; [`set_dynamic_table_capacity`](Self::set_dynamic_table_capacity)
    /// turns dynamic compression on.
    pub fn new(error_sink: Box<dyn ConnectionErrorSink>) -> Self {
        Self {
            table: DynamicTable::new(0),
            encoder_stream: EncoderStreamSender::new(),
            decoder_stream_receiver: DecoderStreamReceiver::new(),
            maximum_blocked_streams: 0,
            outstanding: HashMap::new(),
            error_sink,
            failed: false,
        }
    }

    /// Creates an encoder already configured from peer settings, with the
    /// table capacity set to the advertised maximum.
    pub fn with_settings(
        settings: QpackSettings,
        error_sink: Box<dyn ConnectionErrorSink>,
    ) -> Self {
        let mut encoder = Self::new(error_sink);
        encoder.set_maximum_dynamic_table_capacity(settings.maximum_dynamic_table_capacity);
        encoder.set_maximum_blocked_streams(settings.maximum_blocked_streams);
        if settings.maximum_dynamic_table_capacity > 0 {
            // Within the just-raised maximum, cannot fail.
            let _ = encoder.set_dynamic_table_capacity(settings.maximum_dynamic_table_capacity);
        }
        encoder
    }

    /// Called when SETTINGS_QPACK_MAX_TABLE_CAPACITY arrives.
    pub fn set_maximum_dynamic_table_capacity(&mut self, maximum: u64) {
        self.table.set_maximum_capacity(maximum);
    }

    /// Called when SETTINGS_QPACK_BLOCKED_STREAMS arrives.
    pub fn set_maximum_blocked_streams(&mut self, maximum: u64) {
        self.maximum_blocked_streams = maximum;
    }

    /// Chooses the dynamic table capacity and announces it on the encoder
    /// stream.
    pub fn set_dynamic_table_capacity(&mut self, capacity: u64) -> Result<()> {
        self.table.set_capacity(capacity)?;
        self.encoder_stream.send_set_dynamic_table_capacity(capacity);
        Ok(())
    }

    /// Attaches the unidirectional stream carrying encoder instructions.
    pub fn set_encoder_stream_sender(&mut self, sender: Rc<RefCell<dyn StreamSender>>) {
        self.encoder_stream.set_stream_sender(sender);
    }

    /// Encodes a header list for the given request stream, emitting any
    /// table updates on the encoder stream first. Returns the encoded
    /// field section.
    pub fn encode_header_list(&mut self, stream_id: u64, headers: &[FieldLine]) -> Bytes {
        let base = self.table.inserted_count();
        // References this block makes into the dynamic table, absolute.
        let mut references: SmallVec<[u64; 8]> = SmallVec::new();
        // Whether this block already counts against the blocked budget.
        let mut block_may_block = self.stream_counts_as_blocked(stream_id);
        let mut lines = Vec::with_capacity(headers.len());

        for field in headers {
            let line = self.encode_field(field, &mut references, &mut block_may_block);
            lines.push(line);
        }

        let required_insert_count = references
            .iter()
            .max()
            .map(|&max_ref| max_ref + 1)
            .unwrap_or(0);

        let mut buf = BytesMut::with_capacity(4 + headers.len() * 10);
        HeaderBlockPrefix {
            required_insert_count,
            base,
        }
        .encode(self.table.max_entries(), &mut buf);

        for line in lines {
            let repr = match line {
                Line::Indexed(repr) => repr,
                Line::IndexedDynamic { absolute_index } => {
                    if absolute_index >= base {
                        FieldLineRepr::IndexedPostBase {
                            index: absolute_index - base,
                        }
                    } else {
                        FieldLineRepr::IndexedDynamic {
                            relative_index: base - absolute_index - 1,
                        }
                    }
                }
                Line::LiteralDynamicName {
                    absolute_index,
                    value,
                    never_indexed,
                } => {
                    if absolute_index >= base {
                        FieldLineRepr::LiteralPostBaseNameRef {
                            index: absolute_index - base,
                            value,
                            never_indexed,
                        }
                    } else {
                        FieldLineRepr::LiteralDynamicNameRef {
                            relative_index: base - absolute_index - 1,
                            value,
                            never_indexed,
                        }
                    }
                }
            };
            repr.encode(&mut buf);
        }

        if required_insert_count > 0 {
            let lowest_ref = references.iter().min().copied().unwrap_or(0);
            self.outstanding
                .entry(stream_id)
                .or_default()
                .push_back(OutstandingBlock {
                    required_insert_count,
                    lowest_ref,
                });
        }

        debug!(
            stream_id,
            fields = headers.len(),
            required_insert_count,
            base,
            encoded_len = buf.len(),
            "encoded header list"
        );
        buf.freeze()
    }

    /// Picks the representation for one field, possibly inserting into the
    /// dynamic table via the encoder stream.
    fn encode_field(
        &mut self,
        field: &FieldLine,
        references: &mut SmallVec<[u64; 8]>,
        block_may_block: &mut bool,
    ) -> Line {
        let never_indexed = should_never_index(&field.name);

        if let Some(index) = static_table::find_value(&field.name, &field.value) {
            return Line::Indexed(FieldLineRepr::IndexedStatic { index });
        }

        let draining_index = self.table.draining_index();
        let known_received = self.table.known_received_count();

        if !never_indexed {
            if let Some(absolute_index) = self.table.find_value(&field.name, &field.value)
            {
                if absolute_index >= draining_index
                    && (absolute_index < known_received
                        || self.may_block(block_may_block))
                {
                    if absolute_index >= known_received {
                        *block_may_block = true;
                    }
                    references.push(absolute_index);
                    return Line::IndexedDynamic { absolute_index };
                }

                // Draining match: duplicate it so this and future blocks
                // reference a fresh copy.
                if self.may_block(block_may_block) {
                    if let Some(new_index) = self.try_duplicate(absolute_index, references)
                    {
                        *block_may_block = true;
                        references.push(new_index);
                        return Line::IndexedDynamic {
                            absolute_index: new_index,
                        };
                    }
                }
            }
        }

        let static_name = static_table::find_name(&field.name);
        let dynamic_name = if never_indexed {
            None
        } else {
            self.table
                .find_name(&field.name)
                .filter(|&index| index >= draining_index)
        };

        // Insert-and-reference: the new entry is unacknowledged by
        // definition, so this path needs blocking budget.
        if !never_indexed && self.may_block(block_may_block) {
            if let Some(new_index) =
                self.try_insert(field, static_name, dynamic_name, references)
            {
                *block_may_block = true;
                references.push(new_index);
                return Line::IndexedDynamic {
                    absolute_index: new_index,
                };
            }
        }

        if let Some(name_index) = static_name {
            return Line::Indexed(FieldLineRepr::LiteralStaticNameRef {
                name_index,
                value: field.value.clone(),
                never_indexed,
            });
        }

        if let Some(absolute_index) = dynamic_name {
            if absolute_index < known_received || self.may_block(block_may_block) {
                if absolute_index >= known_received {
                    *block_may_block = true;
                }
                references.push(absolute_index);
                return Line::LiteralDynamicName {
                    absolute_index,
                    value: field.value.clone(),
                    never_indexed,
                };
            }
        }

        Line::Indexed(FieldLineRepr::LiteralWithLiteralName {
            name: field.name.clone(),
            value: field.value.clone(),
            never_indexed,
        })
    }

    /// Inserts `field` via the encoder stream if eviction safety allows.
    fn try_insert(
        &mut self,
        field: &FieldLine,
        static_name: Option<u64>,
        dynamic_name: Option<u64>,
        references: &[u64],
    ) -> Option<u64> {
        if !self
            .table
            .can_insert_without_unsafe_eviction(field.size(), self.lowest_live_ref(references))
        {
            return None;
        }

        if let Some(name_index) = static_name {
            self.encoder_stream
                .send_insert_with_name_ref(true, name_index, field.value.clone());
        } else if let Some(absolute_index) = dynamic_name {
            let relative = self.table.inserted_count() - absolute_index - 1;
            self.encoder_stream
                .send_insert_with_name_ref(false, relative, field.value.clone());
        } else {
            self.encoder_stream
                .send_insert_with_literal_name(field.name.clone(), field.value.clone());
        }
        self.table.insert(field.clone()).ok()
    }

    /// Re-inserts a draining entry via Duplicate.
    fn try_duplicate(&mut self, absolute_index: u64, references: &[u64]) -> Option<u64> {
        let field = self.table.get(absolute_index)?.clone();
        if !self
            .table
            .can_insert_without_unsafe_eviction(field.size(), self.lowest_live_ref(references))
        {
            return None;
        }
        let relative = self.table.inserted_count() - absolute_index - 1;
        self.encoder_stream.send_duplicate(relative);
        self.table.insert(field).ok()
    }

    /// Processes bytes from the peer's decoder stream.
    pub fn on_decoder_stream_bytes(&mut self, data: &[u8]) {
        if self.failed {
            return;
        }
        let instructions = match self.decoder_stream_receiver.receive(data) {
            Ok(instructions) => instructions,
            Err(e) => {
                self.on_fatal_error(e);
                return;
            }
        };
        for instruction in instructions {
            if let Err(e) = self.apply_instruction(instruction) {
                self.on_fatal_error(e);
                return;
            }
        }
    }

    fn apply_instruction(&mut self, instruction: DecoderInstruction) -> Result<()> {
        match instruction {
            DecoderInstruction::SectionAcknowledgement { stream_id } => {
                let queue = self.outstanding.get_mut(&stream_id).ok_or_else(|| {
                    Error::DecoderStream(
                        "Section Acknowledgement for stream with no outstanding header blocks."
                            .into(),
                    )
                })?;
                let block = queue.pop_front().ok_or_else(|| {
                    Error::DecoderStream(
                        "Section Acknowledgement for stream with no outstanding header blocks."
                            .into(),
                    )
                })?;
                if queue.is_empty() {
                    self.outstanding.remove(&stream_id);
                }
                self.table
                    .on_section_acknowledged(block.required_insert_count);
                Ok(())
            }
            DecoderInstruction::StreamCancellation { stream_id } => {
                self.outstanding.remove(&stream_id);
                Ok(())
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                self.table.on_insert_count_increment(increment)
            }
        }
    }

    /// Streams currently counted against the blocked budget: any stream
    /// with an unacknowledged block that could still be blocking the peer.
    fn blocked_stream_count(&self) -> u64 {
        let known_received = self.table.known_received_count();
        self.outstanding
            .values()
            .filter(|blocks| {
                blocks
                    .iter()
                    .any(|b| b.required_insert_count > known_received)
            })
            .count() as u64
    }

    fn stream_counts_as_blocked(&self, stream_id: u64) -> bool {
        let known_received = self.table.known_received_count();
        self.outstanding
            .get(&stream_id)
            .is_some_and(|blocks| {
                blocks
                    .iter()
                    .any(|b| b.required_insert_count > known_received)
            })
    }

    fn may_block(&self, block_already_blocks: &bool) -> bool {
        *block_already_blocks
            || self.blocked_stream_count() < self.maximum_blocked_streams
    }

    /// Smallest absolute index any in-flight block (including the one
    /// being built) still references; eviction must stay below it.
    fn lowest_live_ref(&self, current_references: &[u64]) -> u64 {
        let outstanding = self
            .outstanding
            .values()
            .flatten()
            .map(|b| b.lowest_ref)
            .min()
            .unwrap_or(u64::MAX);
        let current = current_references.iter().min().copied().unwrap_or(u64::MAX);
        outstanding.min(current)
    }

    fn on_fatal_error(&mut self, error: Error) {
        self.failed = true;
        warn!(%error, "decoder stream error, failing connection");
        self.error_sink
            .fail(ErrorCode::QpackDecoderStreamError, &error.to_string());
    }

    /// Current dynamic table capacity.
    pub fn dynamic_table_capacity(&self) -> u64 {
        self.table.capacity()
    }

    /// Total entries inserted into the dynamic table.
    pub fn inserted_count(&self) -> u64 {
        self.table.inserted_count()
    }

    /// Insertions the peer has acknowledged.
    pub fn known_received_count(&self) -> u64 {
        self.table.known_received_count()
    }
}

/// Whether a field must never enter a compression table, per RFC 9204
/// Section 7.1.3. Credentials, cookies, and token-bearing custom headers
/// are emitted as never-indexed literals.
pub fn should_never_index(name: &[u8]) -> bool {
    matches!(
        name,
        b"authorization"
            | b"proxy-authorization"
            | b"cookie"
            | b"set-cookie"
            | b"x-api-key"
            | b"api-key"
            | b"x-auth-token"
            | b"x-csrf-token"
            | b"x-xsrf-token"
            | b"x-amz-security-token"
            | b"sec-websocket-key"
            | b"sec-websocket-accept"
    ) || has_sensitive_suffix(name)
}

fn has_sensitive_suffix(name: &[u8]) -> bool {
    const SUFFIXES: &[&[u8]] = &[
        b"-token",
        b"-key",
        b"-secret",
        b"-password",
        b"-credential",
        b"-signature",
        b"-session-id",
    ];
    SUFFIXES.iter().any(|suffix| {
        name.len() >= suffix.len()
            && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct NoopErrorSink;
    impl ConnectionErrorSink for NoopErrorSink {
        fn fail(&mut self, _code: ErrorCode, _reason: &str) {}
    }

    struct Capture(Rc<RefCell<Vec<u8>>>);
    impl StreamSender for Capture {
        fn write_stream_data(&mut self, data: &[u8]) {
            self.0.borrow_mut().extend_from_slice(data);
        }
    }

    fn encoder_with_stream(capacity: u64) -> (Encoder, Rc<RefCell<Vec<u8>>>) {
        let written = Rc::new(RefCell::new(Vec::new()));
        let settings = QpackSettings {
            maximum_dynamic_table_capacity: capacity,
            maximum_blocked_streams: 16,
            ..QpackSettings::default()
        };
        let mut encoder = Encoder::with_settings(settings, Box::new(NoopErrorSink));
        encoder.set_encoder_stream_sender(Rc::new(RefCell::new(Capture(written.clone()))));
        (encoder, written)
    }

    #[test]
    fn test_static_only_block() {
        let (mut encoder, written) = encoder_with_stream(0);
        written.borrow_mut().clear();

        let headers = [
            FieldLine::new(":method", "GET"),
            FieldLine::new(":scheme", "https"),
            FieldLine::new(":path", "/"),
        ];
        let block = encoder.encode_header_list(0, &headers);

        // Prefix 0000 plus three one-byte static references.
        assert_eq!(&block[..], &[0x00, 0x00, 0xd1, 0xd7, 0xc1]);
        assert!(written.borrow().is_empty());
    }

    #[test]
    fn test_insertion_emits_encoder_stream_instruction() {
        let (mut encoder, written) = encoder_with_stream(4096);

        let headers = [FieldLine::new("custom-header", "custom-value")];
        let block = encoder.encode_header_list(4, &headers);

        assert_eq!(encoder.inserted_count(), 1);
        // Capacity instruction plus the insert.
        assert!(written.borrow().len() > 2);
        // Prefix references the new entry: RIC 1 (encoded 2), Base 0 with
        // the sign bit, then post-base index 0.
        assert_eq!(&block[..2], &[0x02, 0x80]);
        assert_eq!(block[2], 0x10);
    }

    #[test]
    fn test_sensitive_header_never_inserted() {
        let (mut encoder, written) = encoder_with_stream(4096);
        written.borrow_mut().clear();

        let headers = [FieldLine::new("authorization", "Bearer abc")];
        let block = encoder.encode_header_list(0, &headers);

        assert_eq!(encoder.inserted_count(), 0);
        assert!(written.borrow().is_empty());
        // Literal with static name reference (authorization is index 84),
        // N bit set.
        assert_eq!(&block[..2], &[0x00, 0x00]);
        assert_eq!(block[2] & 0b0111_0000, 0b0111_0000);
    }

    #[test]
    fn test_blocked_budget_exhaustion_degrades_to_literal() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let settings = QpackSettings {
            maximum_dynamic_table_capacity: 4096,
            maximum_blocked_streams: 1,
            ..QpackSettings::default()
        };
        let mut encoder = Encoder::with_settings(settings, Box::new(NoopErrorSink));
        encoder.set_encoder_stream_sender(Rc::new(RefCell::new(Capture(written.clone()))));

        let headers = [FieldLine::new("custom-header", "custom-value")];
        encoder.encode_header_list(0, &headers);
        assert_eq!(encoder.inserted_count(), 1);

        // Stream 4 would be a second blocked stream; no insertion, no
        // dynamic reference.
        let before = written.borrow().len();
        let block = encoder.encode_header_list(4, &headers);
        assert_eq!(encoder.inserted_count(), 1);
        assert_eq!(written.borrow().len(), before);
        // RIC 0: block carries no dynamic references.
        assert_eq!(block[0], 0x00);
    }

    #[test]
    fn test_section_ack_raises_known_received_count() {
        let (mut encoder, _written) = encoder_with_stream(4096);

        let headers = [FieldLine::new("custom-header", "custom-value")];
        encoder.encode_header_list(4, &headers);
        assert_eq!(encoder.known_received_count(), 0);

        // Section Acknowledgement for stream 4.
        encoder.on_decoder_stream_bytes(&[0x84]);
        assert_eq!(encoder.known_received_count(), 1);
    }

    #[test]
    fn test_ack_for_unknown_stream_is_fatal() {
        struct RecordingSink(Rc<RefCell<Option<(ErrorCode, String)>>>);
        impl ConnectionErrorSink for RecordingSink {
            fn fail(&mut self, code: ErrorCode, reason: &str) {
                *self.0.borrow_mut() = Some((code, reason.to_string()));
            }
        }

        let recorded = Rc::new(RefCell::new(None));
        let mut encoder = Encoder::with_settings(
            QpackSettings::default(),
            Box::new(RecordingSink(recorded.clone())),
        );

        encoder.on_decoder_stream_bytes(&[0x84]);
        let (code, _reason) = recorded.borrow().clone().unwrap();
        assert_eq!(code, ErrorCode::QpackDecoderStreamError);
    }

    #[test]
    fn test_never_index_policy() {
        assert!(should_never_index(b"authorization"));
        assert!(should_never_index(b"cookie"));
        assert!(should_never_index(b"x-goog-api-key"));
        assert!(should_never_index(b"x-hub-signature"));
        assert!(!should_never_index(b"content-type"));
        assert!(!should_never_index(b"x-request-id"));
    }
}
