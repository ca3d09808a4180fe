//! Encoder stream endpoints (RFC 9204 Section 4.2).
//!
//! The sender side lives in the encoder and serialises dynamic table
//! instructions; the receiver side lives in the decoder and turns the
//! peer's bytes back into instructions. The underlying transport delivers
//! the stream reliably and in order.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{Error, Result};
use crate::instructions::EncoderInstruction;
use crate::StreamSender;

/// Serialises encoder stream instructions and hands them to the stream.
///
/// Instructions sent before a stream sender is attached accumulate and are
/// flushed on attach, so settings-time ordering does not matter.
pub struct EncoderStreamSender {
    delegate: Option<Rc<RefCell<dyn StreamSender>>>,
    pending: BytesMut,
}

impl EncoderStreamSender {
    pub fn new() -> Self {
        Self {
            delegate: None,
            pending: BytesMut::new(),
        }
    }

    pub fn set_stream_sender(&mut self, delegate: Rc<RefCell<dyn StreamSender>>) {
        self.delegate = Some(delegate);
        self.flush();
    }

    pub fn send_set_dynamic_table_capacity(&mut self, capacity: u64) {
        self.send(&EncoderInstruction::SetDynamicTableCapacity { capacity });
    }

    pub fn send_insert_with_name_ref(
        &mut self,
        is_static: bool,
        name_index: u64,
        value: Bytes,
    ) {
        self.send(&EncoderInstruction::InsertWithNameRef {
            is_static,
            name_index,
            value,
        });
    }

    pub fn send_insert_with_literal_name(&mut self, name: Bytes, value: Bytes) {
        self.send(&EncoderInstruction::InsertWithLiteralName { name, value });
    }

    pub fn send_duplicate(&mut self, index: u64) {
        self.send(&EncoderInstruction::Duplicate { index });
    }

    fn send(&mut self, instruction: &EncoderInstruction) {
        trace!(?instruction, "sending encoder stream instruction");
        instruction.encode(&mut self.pending);
        self.flush();
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(delegate) = &self.delegate {
            let data = self.pending.split();
            delegate.borrow_mut().write_stream_data(&data);
        }
    }
}

impl Default for EncoderStreamSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles encoder stream bytes into instructions.
///
/// Bytes may arrive split at arbitrary points; partial instructions stay
/// buffered until completed by later data.
pub struct EncoderStreamReceiver {
    buffer: BytesMut,
    maximum_string_length: u64,
}

impl EncoderStreamReceiver {
    pub fn new(maximum_string_length: u64) -> Self {
        Self {
            buffer: BytesMut::new(),
            maximum_string_length,
        }
    }

    /// Consumes stream bytes, returning the complete instructions they
    /// finish. Any error is fatal for the connection.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<EncoderInstruction>> {
        self.buffer.extend_from_slice(data);

        let mut instructions = Vec::new();
        let mut pos = 0;
        loop {
            match EncoderInstruction::decode(&self.buffer[pos..], self.maximum_string_length)
            {
                Ok((instruction, consumed)) => {
                    trace!(?instruction, "received encoder stream instruction");
                    instructions.push(instruction);
                    pos += consumed;
                }
                Err(Error::Incomplete) => break,
                Err(e) => return Err(e),
            }
        }
        let _ = self.buffer.split_to(pos);
        Ok(instructions)
    }
}
