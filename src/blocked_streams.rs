//! Blocked stream accounting (RFC 9204 Section 2.1.2).
//!
//! The registry knows which request streams are waiting on dynamic table
//! insertions and enforces the peer-advertised limit. It holds stream ids
//! and weak handles only; progressive decoders are owned by their
//! accumulators.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::progressive::ProgressiveDecoder;

struct BlockedStream {
    required_insert_count: u64,
    decoder: Weak<RefCell<ProgressiveDecoder>>,
}

/// Per-connection set of currently blocked request streams.
pub struct BlockedStreamRegistry {
    maximum_blocked_streams: u64,
    streams: HashMap<u64, BlockedStream>,
}

impl BlockedStreamRegistry {
    pub fn new(maximum_blocked_streams: u64) -> Self {
        Self {
            maximum_blocked_streams,
            streams: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Registers a newly blocked stream.
    pub fn register(
        &mut self,
        stream_id: u64,
        required_insert_count: u64,
        decoder: Weak<RefCell<ProgressiveDecoder>>,
    ) -> Result<()> {
        if !self.streams.contains_key(&stream_id)
            && self.streams.len() as u64 >= self.maximum_blocked_streams
        {
            return Err(Error::BlockedStreamLimitExceeded);
        }
        self.streams.insert(
            stream_id,
            BlockedStream {
                required_insert_count,
                decoder,
            },
        );
        Ok(())
    }

    /// Removes a stream, whether unblocked, failed, or cancelled.
    pub fn deregister(&mut self, stream_id: u64) {
        self.streams.remove(&stream_id);
    }

    /// Removes and returns every stream whose Required Insert Count is now
    /// satisfied. Callers drive the returned decoders after this borrow
    /// ends, so resumption never re-enters the registry mid-iteration.
    pub fn take_unblocked(
        &mut self,
        inserted_count: u64,
    ) -> Vec<Rc<RefCell<ProgressiveDecoder>>> {
        let ready: Vec<u64> = self
            .streams
            .iter()
            .filter(|(_, s)| s.required_insert_count <= inserted_count)
            .map(|(&id, _)| id)
            .collect();

        ready
            .into_iter()
            .filter_map(|id| {
                self.streams
                    .remove(&id)
                    .and_then(|s| s.decoder.upgrade())
            })
            .collect()
    }
}
