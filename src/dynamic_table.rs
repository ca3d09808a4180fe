//! Dynamic table (RFC 9204 Section 3.2).
//!
//! A size-bounded FIFO of field lines shared between the two endpoints of
//! one direction. Entries carry monotonically increasing absolute indices;
//! the live entries always form the contiguous range
//! `[dropped_count, inserted_count)`. Capacity changes and insertions evict
//! from the oldest end.
//!
//! The encoder-side instance additionally tracks the Known Received Count
//! and must never evict an entry the peer has not acknowledged.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::header_list::{FieldLine, ENTRY_OVERHEAD};

/// The QPACK dynamic table.
pub struct DynamicTable {
    /// Live entries; absolute index = `dropped_count + position`.
    entries: VecDeque<FieldLine>,
    capacity: u64,
    maximum_capacity: u64,
    size: u64,
    inserted_count: u64,
    dropped_count: u64,
    known_received_count: u64,
    /// Latest absolute index per name, live entries only.
    name_to_latest: HashMap<Bytes, u64>,
    /// Latest absolute index per (name, value) pair, live entries only.
    pair_to_latest: HashMap<(Bytes, Bytes), u64>,
}

impl DynamicTable {
    /// Creates a table with zero capacity. Nothing can be inserted until
    /// a Set Dynamic Table Capacity raises it.
    pub fn new(maximum_capacity: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: 0,
            maximum_capacity,
            size: 0,
            inserted_count: 0,
            dropped_count: 0,
            known_received_count: 0,
            name_to_latest: HashMap::new(),
            pair_to_latest: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn maximum_capacity(&self) -> u64 {
        self.maximum_capacity
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn inserted_count(&self) -> u64 {
        self.inserted_count
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// `MaxEntries` for Required Insert Count wire encoding: the most
    /// entries the table could ever hold, derived from the maximum (not
    /// current) capacity since the smallest possible entry is 32 bytes.
    pub fn max_entries(&self) -> u64 {
        self.maximum_capacity / ENTRY_OVERHEAD
    }

    /// Raises the settings-derived upper bound. Called once when the peer's
    /// SETTINGS arrive.
    pub fn set_maximum_capacity(&mut self, maximum_capacity: u64) {
        self.maximum_capacity = maximum_capacity;
    }

    /// Changes the table capacity, evicting oldest entries as needed.
    pub fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        if capacity > self.maximum_capacity {
            return Err(Error::CapacityExceedsMaximum {
                capacity,
                maximum: self.maximum_capacity,
            });
        }
        self.capacity = capacity;
        while self.size > self.capacity && !self.entries.is_empty() {
            self.evict_one();
        }
        Ok(())
    }

    /// Inserts a field line, returning its absolute index.
    pub fn insert(&mut self, field: FieldLine) -> Result<u64> {
        let entry_size = field.size();
        if entry_size > self.capacity {
            return Err(Error::EntryTooLarge {
                size: entry_size,
                capacity: self.capacity,
            });
        }
        while self.size + entry_size > self.capacity && !self.entries.is_empty() {
            self.evict_one();
        }

        let absolute_index = self.inserted_count;
        self.name_to_latest
            .insert(field.name.clone(), absolute_index);
        self.pair_to_latest
            .insert((field.name.clone(), field.value.clone()), absolute_index);
        self.size += entry_size;
        self.entries.push_back(field);
        self.inserted_count += 1;
        Ok(absolute_index)
    }

    fn evict_one(&mut self) {
        let Some(field) = self.entries.pop_front() else {
            return;
        };
        let absolute_index = self.dropped_count;
        self.size -= field.size();
        self.dropped_count += 1;

        // Lookup maps track only the latest index per key; drop the key
        // when it still points at the evicted entry.
        if self.name_to_latest.get(&field.name) == Some(&absolute_index) {
            self.name_to_latest.remove(&field.name);
        }
        let pair = (field.name, field.value);
        if self.pair_to_latest.get(&pair) == Some(&absolute_index) {
            self.pair_to_latest.remove(&pair);
        }
    }

    /// Looks up an entry by absolute index.
    pub fn get(&self, absolute_index: u64) -> Option<&FieldLine> {
        if absolute_index < self.dropped_count {
            return None;
        }
        self.entries
            .get(usize::try_from(absolute_index - self.dropped_count).ok()?)
    }

    /// Looks up an entry by index relative to `base` (relative 0 is the
    /// entry at `base - 1`).
    pub fn get_relative(&self, relative_index: u64, base: u64) -> Option<&FieldLine> {
        let absolute_index = base.checked_sub(relative_index + 1)?;
        self.get(absolute_index)
    }

    /// Latest live entry matching both name and value. `Bytes` handles
    /// clone cheaply, which keeps the owned-pair map key construction free
    /// of copies.
    pub fn find_value(&self, name: &Bytes, value: &Bytes) -> Option<u64> {
        self.pair_to_latest
            .get(&(name.clone(), value.clone()))
            .copied()
    }

    /// Latest live entry matching the name.
    pub fn find_name(&self, name: &[u8]) -> Option<u64> {
        self.name_to_latest.get(name).copied()
    }

    /// Applies an Insert Count Increment from the peer's decoder stream.
    pub fn on_insert_count_increment(&mut self, increment: u64) -> Result<()> {
        if increment == 0 {
            return Err(Error::DecoderStream(
                "Insert Count Increment with increment of zero.".into(),
            ));
        }
        let updated = self
            .known_received_count
            .checked_add(increment)
            .ok_or(Error::IntegerOverflow)?;
        if updated > self.inserted_count {
            return Err(Error::DecoderStream(
                "Insert Count Increment exceeds inserted entry count.".into(),
            ));
        }
        self.known_received_count = updated;
        Ok(())
    }

    /// Raises the Known Received Count after a Section Acknowledgement for
    /// a block with the given Required Insert Count.
    pub fn on_section_acknowledged(&mut self, required_insert_count: u64) {
        debug_assert!(required_insert_count <= self.inserted_count);
        if required_insert_count > self.known_received_count {
            self.known_received_count = required_insert_count;
        }
    }

    /// Whether inserting an entry of `entry_size` bytes would evict only
    /// entries below both the Known Received Count and `lowest_live_ref`
    /// (the smallest absolute index still referenced by an unacknowledged
    /// header block).
    pub fn can_insert_without_unsafe_eviction(
        &self,
        entry_size: u64,
        lowest_live_ref: u64,
    ) -> bool {
        if entry_size > self.capacity {
            return false;
        }
        let mut reclaimed = self.capacity - self.size;
        let mut index = self.dropped_count;
        while reclaimed < entry_size {
            if index >= self.known_received_count || index >= lowest_live_ref {
                return false;
            }
            match self.get(index) {
                Some(field) => reclaimed += field.size(),
                None => return false,
            }
            index += 1;
        }
        true
    }

    /// Smallest absolute index the encoder should still reference.
    ///
    /// The oldest entries covering the last quarter of the capacity are
    /// considered draining: they are close enough to eviction that new
    /// references to them risk blocking on a doomed entry. Mirrors the
    /// draining zone of the original header table.
    pub fn draining_index(&self) -> u64 {
        let required_free = self.capacity / 4;
        let mut free = self.capacity - self.size;
        let mut index = self.dropped_count;
        while free < required_free {
            match self.get(index) {
                Some(field) => free += field.size(),
                None => break,
            }
            index += 1;
        }
        index
    }
}
