//! Decoder stream endpoints (RFC 9204 Section 4.2).
//!
//! Mirror of the encoder stream: the sender side lives in the decoder and
//! reports section acknowledgements, stream cancellations, and insert
//! count increments; the receiver side lives in the encoder.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;
use tracing::trace;

use crate::error::{Error, Result};
use crate::instructions::DecoderInstruction;
use crate::StreamSender;

/// Serialises decoder stream instructions and hands them to the stream.
pub struct DecoderStreamSender {
    delegate: Option<Rc<RefCell<dyn StreamSender>>>,
    pending: BytesMut,
}

impl DecoderStreamSender {
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

    pub fn send_section_acknowledgement(&mut self, stream_id: u64) {
        self.send(&DecoderInstruction::SectionAcknowledgement { stream_id });
    }

    pub fn send_stream_cancellation(&mut self, stream_id: u64) {
        self.send(&DecoderInstruction::StreamCancellation { stream_id });
    }

    pub fn send_insert_count_increment(&mut self, increment: u64) {
        self.send(&DecoderInstruction::InsertCountIncrement { increment });
    }

    fn send(&mut self, instruction: &DecoderInstruction) {
        trace!(?instruction, "sending decoder stream instruction");
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

impl Default for DecoderStreamSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles decoder stream bytes into instructions.
pub struct DecoderStreamReceiver {
    buffer: BytesMut,
}

impl DecoderStreamReceiver {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Consumes stream bytes, returning the complete instructions they
    /// finish. Any error is fatal for the connection.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<DecoderInstruction>> {
        self.buffer.extend_from_slice(data);

        let mut instructions = Vec::new();
        let mut pos = 0;
        loop {
            match DecoderInstruction::decode(&self.buffer[pos..]) {
                Ok((instruction, consumed)) => {
                    trace!(?instruction, "received decoder stream instruction");
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

impl Default for DecoderStreamReceiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_wire_bytes() {
        struct Capture(Rc<RefCell<Vec<u8>>>);
        impl StreamSender for Capture {
            fn write_stream_data(&mut self, data: &[u8]) {
                self.0.borrow_mut().extend_from_slice(data);
            }
        }

        let written = Rc::new(RefCell::new(Vec::new()));
        let mut sender = DecoderStreamSender::new();
        sender.set_stream_sender(Rc::new(RefCell::new(Capture(written.clone()))));

        sender.send_section_acknowledgement(1);
        sender.send_stream_cancellation(4);
        sender.send_insert_count_increment(2);
        assert_eq!(&written.borrow()[..], &[0x81, 0x44, 0x02]);
    }

    #[test]
    fn test_receiver_reassembles_split_input() {
        let mut receiver = DecoderStreamReceiver::new();

        // Section ack for stream 4000 takes a continuation byte.
        let mut buf = BytesMut::new();
        DecoderInstruction::SectionAcknowledgement { stream_id: 4000 }.encode(&mut buf);

        assert_eq!(receiver.receive(&buf[..1]).unwrap(), vec![]);
        assert_eq!(
            receiver.receive(&buf[1..]).unwrap(),
            vec![DecoderInstruction::SectionAcknowledgement { stream_id: 4000 }]
        );
    }
}
