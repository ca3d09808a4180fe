//! Progressive decoding of one encoded field section.
//!
//! Bytes arrive in order for a single request stream but interleave
//! arbitrarily with the encoder stream, so a header block referencing
//! dynamic table entries may have to wait for insertions. The state
//! machine is:
//!
//! ```text
//! ReadingPrefix ──(RIC satisfied)──► DecodingBody ──► Done
//!       │                                 ▲            │
//!       └──(RIC > inserted)──► Blocked ───┘         Failed
//! ```
//!
//! While `Blocked`, body bytes buffer; the owning decoder resumes this
//! state machine when insertions satisfy the Required Insert Count.
//! Exactly one terminal visitor callback fires, even when the failure is
//! discovered after `end_header_block`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::accumulator::Visitor;
use crate::blocked_streams::BlockedStreamRegistry;
use crate::decoder_stream::DecoderStreamSender;
use crate::dynamic_table::DynamicTable;
use crate::error::Error;
use crate::header_block::{FieldLineRepr, HeaderBlockPrefix};
use crate::header_list::{FieldLine, HeaderList};
use crate::static_table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingPrefix,
    Blocked,
    DecodingBody,
    Done,
    Failed,
}

/// Per-request-stream decoder state machine.
pub struct ProgressiveDecoder {
    stream_id: u64,
    state: State,
    /// Received but not yet decoded bytes.
    buffer: BytesMut,
    required_insert_count: u64,
    base: u64,
    /// Whether this block referenced the dynamic table at all; governs
    /// Section Acknowledgement and Stream Cancellation emission.
    referenced_dynamic_table: bool,
    header_list: HeaderList,
    max_header_list_size: u64,
    maximum_string_length: u64,
    end_of_block: bool,
    table: Rc<RefCell<DynamicTable>>,
    decoder_stream: Rc<RefCell<DecoderStreamSender>>,
    registry: Rc<RefCell<BlockedStreamRegistry>>,
    visitor: Option<Box<dyn Visitor>>,
    self_handle: Weak<RefCell<ProgressiveDecoder>>,
}

impl ProgressiveDecoder {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stream_id: u64,
        table: Rc<RefCell<DynamicTable>>,
        decoder_stream: Rc<RefCell<DecoderStreamSender>>,
        registry: Rc<RefCell<BlockedStreamRegistry>>,
        visitor: Box<dyn Visitor>,
        max_header_list_size: u64,
        maximum_string_length: u64,
        self_handle: Weak<RefCell<ProgressiveDecoder>>,
    ) -> Self {
        Self {
            stream_id,
            state: State::ReadingPrefix,
            buffer: BytesMut::new(),
            required_insert_count: 0,
            base: 0,
            referenced_dynamic_table: false,
            header_list: HeaderList::new(),
            max_header_list_size,
            maximum_string_length,
            end_of_block: false,
            table,
            decoder_stream,
            registry,
            visitor: Some(visitor),
            self_handle,
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn is_blocked(&self) -> bool {
        self.state == State::Blocked
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
    }

    /// Feeds header block bytes in arrival order.
    pub fn decode(&mut self, data: &[u8]) {
        if self.is_terminal() {
            return;
        }
        self.header_list.add_compressed_bytes(data.len() as u64);
        self.buffer.extend_from_slice(data);
        self.process();
    }

    /// Signals that the last byte of the block has been fed.
    ///
    /// A block still blocked at this point is legal; the terminal callback
    /// fires whenever unblocking later completes or fails it.
    pub fn end_header_block(&mut self) {
        if self.is_terminal() || self.end_of_block {
            return;
        }
        self.end_of_block = true;

        match self.state {
            State::ReadingPrefix => self.fail("Incomplete header data prefix."),
            State::Blocked => {}
            State::DecodingBody => self.process(),
            State::Done | State::Failed => {}
        }
    }

    /// Resumes decoding after insertions satisfied the Required Insert
    /// Count. Called by the owning decoder, never re-entrantly from a
    /// table mutation.
    pub(crate) fn on_unblocked(&mut self) {
        if self.state != State::Blocked {
            return;
        }
        debug!(stream_id = self.stream_id, "stream unblocked");
        self.state = State::DecodingBody;
        self.process();
    }

    /// Abandons the block without a terminal callback. Returns whether the
    /// block had referenced the dynamic table, which decides if a Stream
    /// Cancellation goes out.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.state == State::Blocked {
            self.registry.borrow_mut().deregister(self.stream_id);
        }
        self.state = State::Failed;
        self.visitor = None;
        self.buffer.clear();
        self.referenced_dynamic_table
    }

    fn process(&mut self) {
        if self.state == State::ReadingPrefix {
            self.read_prefix();
        }
        if self.state == State::DecodingBody {
            self.decode_body();
        }
    }

    fn read_prefix(&mut self) {
        let (max_entries, inserted_count) = {
            let table = self.table.borrow();
            (table.max_entries(), table.inserted_count())
        };

        let (prefix, consumed) =
            match HeaderBlockPrefix::decode(&self.buffer, max_entries, inserted_count) {
                Ok(decoded) => decoded,
                Err(Error::Incomplete) => {
                    if self.end_of_block {
                        self.fail("Incomplete header data prefix.");
                    }
                    return;
                }
                Err(Error::InvalidRequiredInsertCount) => {
                    self.fail("Invalid required insert count.");
                    return;
                }
                Err(e) => {
                    self.fail(message_for(&e));
                    return;
                }
            };

        let _ = self.buffer.split_to(consumed);
        self.required_insert_count = prefix.required_insert_count;
        self.base = prefix.base;
        if prefix.required_insert_count > 0 {
            self.referenced_dynamic_table = true;
        }
        trace!(
            stream_id = self.stream_id,
            required_insert_count = prefix.required_insert_count,
            base = prefix.base,
            "decoded header block prefix"
        );

        if prefix.required_insert_count > inserted_count {
            let registered = self.registry.borrow_mut().register(
                self.stream_id,
                prefix.required_insert_count,
                self.self_handle.clone(),
            );
            match registered {
                Ok(()) => {
                    debug!(
                        stream_id = self.stream_id,
                        required_insert_count = prefix.required_insert_count,
                        inserted_count,
                        "stream blocked on dynamic table"
                    );
                    self.state = State::Blocked;
                }
                Err(_) => self.fail("Limit on number of blocked streams exceeded."),
            }
            return;
        }
        self.state = State::DecodingBody;
    }

    fn decode_body(&mut self) {
        while !self.buffer.is_empty() {
            match FieldLineRepr::decode(&self.buffer, self.maximum_string_length) {
                Ok((repr, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    if let Err(message) = self.process_field_line(repr) {
                        self.fail(message);
                        return;
                    }
                }
                Err(Error::Incomplete) => break,
                Err(e) => {
                    self.fail(message_for(&e));
                    return;
                }
            }
        }

        if self.end_of_block {
            if self.buffer.is_empty() {
                self.finish();
            } else {
                self.fail("Incomplete header block.");
            }
        }
    }

    fn process_field_line(&mut self, repr: FieldLineRepr) -> Result<(), &'static str> {
        let field = match repr {
            FieldLineRepr::IndexedStatic { index } => {
                let entry =
                    static_table::get(index).ok_or("Static table entry not found.")?;
                FieldLine::new(
                    Bytes::from_static(entry.name.as_bytes()),
                    Bytes::from_static(entry.value.as_bytes()),
                )
            }
            FieldLineRepr::IndexedDynamic { relative_index } => {
                let absolute_index = relative_index
                    .checked_add(1)
                    .and_then(|i| self.base.checked_sub(i))
                    .ok_or("Invalid relative index.")?;
                self.referenced_dynamic_table = true;
                self.table
                    .borrow()
                    .get(absolute_index)
                    .cloned()
                    .ok_or("Dynamic table entry not found.")?
            }
            FieldLineRepr::IndexedPostBase { index } => {
                let absolute_index = self
                    .base
                    .checked_add(index)
                    .filter(|&i| i < self.required_insert_count)
                    .ok_or("Invalid post-base index.")?;
                self.referenced_dynamic_table = true;
                self.table
                    .borrow()
                    .get(absolute_index)
                    .cloned()
                    .ok_or("Dynamic table entry not found.")?
            }
            FieldLineRepr::LiteralStaticNameRef {
                name_index, value, ..
            } => {
                let entry = static_table::get(name_index)
                    .ok_or("Static table entry not found.")?;
                FieldLine::new(Bytes::from_static(entry.name.as_bytes()), value)
            }
            FieldLineRepr::LiteralDynamicNameRef {
                relative_index,
                value,
                ..
            } => {
                let absolute_index = relative_index
                    .checked_add(1)
                    .and_then(|i| self.base.checked_sub(i))
                    .ok_or("Invalid relative name index.")?;
                self.referenced_dynamic_table = true;
                let name = self
                    .table
                    .borrow()
                    .get(absolute_index)
                    .map(|e| e.name.clone())
                    .ok_or("Dynamic table entry not found.")?;
                FieldLine::new(name, value)
            }
            FieldLineRepr::LiteralPostBaseNameRef { index, value, .. } => {
                let absolute_index = self
                    .base
                    .checked_add(index)
                    .filter(|&i| i < self.required_insert_count)
                    .ok_or("Invalid post-base name index.")?;
                self.referenced_dynamic_table = true;
                let name = self
                    .table
                    .borrow()
                    .get(absolute_index)
                    .map(|e| e.name.clone())
                    .ok_or("Dynamic table entry not found.")?;
                FieldLine::new(name, value)
            }
            FieldLineRepr::LiteralWithLiteralName { name, value, .. } => {
                FieldLine::new(name, value)
            }
        };

        self.header_list.push(field, self.max_header_list_size);
        Ok(())
    }

    fn finish(&mut self) {
        if self.required_insert_count > 0 {
            self.decoder_stream
                .borrow_mut()
                .send_section_acknowledgement(self.stream_id);
        }

        let mut list = std::mem::take(&mut self.header_list);
        list.finish();
        self.state = State::Done;
        debug!(
            stream_id = self.stream_id,
            fields = list.len(),
            "header block decoded"
        );
        if let Some(mut visitor) = self.visitor.take() {
            visitor.on_headers_decoded(list);
        }
    }

    fn fail(&mut self, message: &'static str) {
        if self.is_terminal() {
            return;
        }
        if self.state == State::Blocked {
            self.registry.borrow_mut().deregister(self.stream_id);
        }
        self.state = State::Failed;
        self.buffer.clear();
        debug!(stream_id = self.stream_id, message, "header block failed");
        if let Some(mut visitor) = self.visitor.take() {
            visitor.on_header_decoding_error(message);
        }
    }
}

fn message_for(error: &Error) -> &'static str {
    match error {
        Error::Huffman(_) => "Error in Huffman-encoded string.",
        Error::StringTooLong { .. } => "String literal too long.",
        Error::IntegerOverflow | Error::IntegerTooLong => "Encoded integer too large.",
        _ => "Invalid encoded field section.",
    }
}
