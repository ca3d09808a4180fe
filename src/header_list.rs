//! Field lines and the decoded header list.

use std::fmt;

use bytes::Bytes;

/// Per-entry overhead used for dynamic table and header list size
/// accounting, RFC 9204 Section 3.2.1.
pub const ENTRY_OVERHEAD: u64 = 32;

/// An HTTP field line (name-value pair).
#[derive(Clone, PartialEq, Eq)]
pub struct FieldLine {
    pub name: Bytes,
    pub value: Bytes,
}

impl FieldLine {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size for table accounting: name + value + 32.
    pub fn size(&self) -> u64 {
        self.name.len() as u64 + self.value.len() as u64 + ENTRY_OVERHEAD
    }
}

impl fmt::Debug for FieldLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FieldLine({:?}: {:?})",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl From<(&'static str, &'static str)> for FieldLine {
    fn from((name, value): (&'static str, &'static str)) -> Self {
        Self::new(name, value)
    }
}

/// An ordered list of decoded field lines with byte accounting.
///
/// A list that grew past its size limit finishes as an empty sentinel with
/// both byte counters zeroed; the upper layer decides how to react. The
/// limit counts `name + value + 32` per field, while
/// `uncompressed_header_bytes` counts `name + value` only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    fields: Vec<FieldLine>,
    uncompressed_header_bytes: u64,
    compressed_header_bytes: u64,
    running_size: u64,
    limit_exceeded: bool,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, tracking the accumulated size against `max_size`.
    ///
    /// Once the limit is exceeded, subsequent fields are dropped but the
    /// counters keep no record of them; decoding continues so the wire
    /// stays in sync.
    pub fn push(&mut self, field: FieldLine, max_size: u64) {
        self.running_size += field.size();
        if self.running_size > max_size {
            self.limit_exceeded = true;
        }
        if !self.limit_exceeded {
            self.uncompressed_header_bytes +=
                field.name.len() as u64 + field.value.len() as u64;
            self.fields.push(field);
        }
    }

    /// Records wire bytes consumed for this header block.
    pub fn add_compressed_bytes(&mut self, n: u64) {
        self.compressed_header_bytes += n;
    }

    /// Finalises the list. An over-limit list becomes the empty sentinel.
    pub fn finish(&mut self) {
        if self.limit_exceeded {
            self.fields.clear();
            self.uncompressed_header_bytes = 0;
            self.compressed_header_bytes = 0;
        }
    }

    pub fn fields(&self) -> &[FieldLine] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Total `name + value` bytes across the list.
    pub fn uncompressed_header_bytes(&self) -> u64 {
        self.uncompressed_header_bytes
    }

    /// Wire bytes this list was decoded from.
    pub fn compressed_header_bytes(&self) -> u64 {
        self.compressed_header_bytes
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a FieldLine;
    type IntoIter = std::slice::Iter<'a, FieldLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
