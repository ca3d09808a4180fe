//! Per-connection QPACK decoder.
//!
//! Owns the dynamic table, the decoder stream sender, the blocked stream
//! registry, and one progressive decoder per request stream. The peer's
//! encoder stream mutates the table here; each insertion re-checks blocked
//! streams and resumes the ones whose Required Insert Count is satisfied.
//!
//! Exactly one instance exists per connection. Errors on the encoder
//! stream are connection-fatal and reported once through the
//! [`ConnectionErrorSink`]; afterwards the decoder ignores further input.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::accumulator::{DecodedHeadersAccumulator, Visitor};
use crate::blocked_streams::BlockedStreamRegistry;
use crate::config::QpackSettings;
use crate::decoder_stream::DecoderStreamSender;
use crate::dynamic_table::DynamicTable;
use crate::error::{Error, ErrorCode, Result};
use crate::encoder_stream::EncoderStreamReceiver;
use crate::header_list::FieldLine;
use crate::instructions::EncoderInstruction;
use crate::progressive::ProgressiveDecoder;
use crate::{static_table, ConnectionErrorSink, StreamSender};

/// QPACK decoder for one HTTP/3 connection.
pub struct Decoder {
    table: Rc<RefCell<DynamicTable>>,
    decoder_stream: Rc<RefCell<DecoderStreamSender>>,
    registry: Rc<RefCell<BlockedStreamRegistry>>,
    encoder_stream_receiver: EncoderStreamReceiver,
    error_sink: Box<dyn ConnectionErrorSink>,
    /// Live request streams; strong ownership stays with the accumulators.
    streams: HashMap<u64, Weak<RefCell<ProgressiveDecoder>>>,
    maximum_string_length: u64,
    failed: bool,
}

impl Decoder {
    pub fn new(settings: QpackSettings, error_sink: Box<dyn ConnectionErrorSink>) -> Self {
        Self {
            table: Rc::new(RefCell::new(DynamicTable::new(
                settings.maximum_dynamic_table_capacity,
            ))),
            decoder_stream: Rc::new(RefCell::new(DecoderStreamSender::new())),
            registry: Rc::new(RefCell::new(BlockedStreamRegistry::new(
                settings.maximum_blocked_streams,
            ))),
            encoder_stream_receiver: EncoderStreamReceiver::new(
                settings.maximum_string_length,
            ),
            error_sink,
            streams: HashMap::new(),
            maximum_string_length: settings.maximum_string_length,
            failed: false,
        }
    }

    /// Attaches the unidirectional stream the decoder sends its own
    /// instructions on. Instructions issued earlier are flushed here.
    pub fn set_decoder_stream_sender(&mut self, sender: Rc<RefCell<dyn StreamSender>>) {
        self.decoder_stream.borrow_mut().set_stream_sender(sender);
    }

    /// Creates the decoding pipeline for one request stream. The returned
    /// accumulator owns the per-stream state; the decoder keeps a weak
    /// handle for unblocking and cancellation.
    pub fn create_progressive_decoder(
        &mut self,
        stream_id: u64,
        visitor: Box<dyn Visitor>,
        max_header_list_size: u64,
    ) -> DecodedHeadersAccumulator {
        self.streams.retain(|_, weak| weak.strong_count() > 0);

        let decoder = Rc::new_cyclic(|weak| {
            RefCell::new(ProgressiveDecoder::new(
                stream_id,
                self.table.clone(),
                self.decoder_stream.clone(),
                self.registry.clone(),
                visitor,
                max_header_list_size,
                self.maximum_string_length,
                weak.clone(),
            ))
        });
        self.streams.insert(stream_id, Rc::downgrade(&decoder));
        DecodedHeadersAccumulator::new(decoder)
    }

    /// Processes bytes from the peer's encoder stream.
    pub fn on_encoder_stream_bytes(&mut self, data: &[u8]) {
        if self.failed {
            return;
        }
        let instructions = match self.encoder_stream_receiver.receive(data) {
            Ok(instructions) => instructions,
            Err(e) => {
                self.on_fatal_error(e);
                return;
            }
        };
        for instruction in instructions {
            match self.apply_instruction(instruction) {
                Ok(true) => self.drain_unblocked(),
                Ok(false) => {}
                Err(e) => {
                    self.on_fatal_error(e);
                    return;
                }
            }
        }
    }

    /// Handles transport-level cancellation of a request stream: the
    /// per-stream state is discarded and, when the block had referenced
    /// the dynamic table, a Stream Cancellation goes out on the decoder
    /// stream.
    pub fn on_stream_cancel(&mut self, stream_id: u64) {
        self.registry.borrow_mut().deregister(stream_id);
        let referenced = self
            .streams
            .remove(&stream_id)
            .and_then(|weak| weak.upgrade())
            .map(|decoder| decoder.borrow_mut().cancel())
            .unwrap_or(false);
        if referenced {
            debug!(stream_id, "cancelling stream with dynamic table references");
            self.decoder_stream
                .borrow_mut()
                .send_stream_cancellation(stream_id);
        }
    }

    /// Sends an Insert Count Increment. Emission policy belongs to the
    /// embedder; the decoder itself acknowledges sections as they finish.
    pub fn send_insert_count_increment(&mut self, increment: u64) {
        self.decoder_stream
            .borrow_mut()
            .send_insert_count_increment(increment);
    }

    /// Current dynamic table capacity.
    pub fn dynamic_table_capacity(&self) -> u64 {
        self.table.borrow().capacity()
    }

    /// Total entries ever inserted into the dynamic table.
    pub fn inserted_count(&self) -> u64 {
        self.table.borrow().inserted_count()
    }

    /// Number of request streams currently blocked.
    pub fn blocked_stream_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Applies one encoder stream instruction to the dynamic table.
    /// Returns whether an entry was inserted.
    fn apply_instruction(&mut self, instruction: EncoderInstruction) -> Result<bool> {
        let mut table = self.table.borrow_mut();
        match instruction {
            EncoderInstruction::SetDynamicTableCapacity { capacity } => {
                debug!(capacity, "peer set dynamic table capacity");
                table
                    .set_capacity(capacity)
                    .map_err(|e| Error::EncoderStream(e.to_string()))?;
                Ok(false)
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let name = if is_static {
                    static_table::get(name_index)
                        .map(|entry| bytes::Bytes::from_static(entry.name.as_bytes()))
                        .ok_or_else(|| {
                            Error::EncoderStream(
                                "insert references unknown static entry".into(),
                            )
                        })?
                } else {
                    let inserted_count = table.inserted_count();
                    table
                        .get_relative(name_index, inserted_count)
                        .map(|entry| entry.name.clone())
                        .ok_or_else(|| {
                            Error::EncoderStream(
                                "insert references unknown dynamic entry".into(),
                            )
                        })?
                };
                table
                    .insert(FieldLine::new(name, value))
                    .map_err(|e| Error::EncoderStream(e.to_string()))?;
                Ok(true)
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                table
                    .insert(FieldLine::new(name, value))
                    .map_err(|e| Error::EncoderStream(e.to_string()))?;
                Ok(true)
            }
            EncoderInstruction::Duplicate { index } => {
                let inserted_count = table.inserted_count();
                let field = table
                    .get_relative(index, inserted_count)
                    .cloned()
                    .ok_or_else(|| {
                        Error::EncoderStream(
                            "duplicate references unknown dynamic entry".into(),
                        )
                    })?;
                table
                    .insert(field)
                    .map_err(|e| Error::EncoderStream(e.to_string()))?;
                Ok(true)
            }
        }
    }

    /// Resumes every blocked stream whose Required Insert Count is now
    /// satisfied. The registry borrow ends before any decoder runs, so
    /// resumed streams may fail or finish without re-entering it
    /// mid-iteration.
    fn drain_unblocked(&mut self) {
        let inserted_count = self.table.borrow().inserted_count();
        let ready = self.registry.borrow_mut().take_unblocked(inserted_count);
        for decoder in ready {
            decoder.borrow_mut().on_unblocked();
        }
    }

    fn on_fatal_error(&mut self, error: Error) {
        self.failed = true;
        warn!(%error, "encoder stream error, failing connection");
        self.error_sink
            .fail(ErrorCode::QpackEncoderStreamError, &error.to_string());
    }
}
