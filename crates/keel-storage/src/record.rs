//! Record identifiers and record payloads.

use crate::heap::SlotId;
use bytes::Bytes;

/// Identifies one record within a heap file.
///
/// Combines a data page number with a slot within that page. Stays valid
/// until the record is deleted; slots are never renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    /// Data page holding the record.
    pub page_num: u32,
    /// Slot within the page.
    pub slot_id: SlotId,
}

impl RecordId {
    /// Creates a new record ID.
    pub fn new(page_num: u32, slot_id: SlotId) -> Self {
        Self { page_num, slot_id }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_num, self.slot_id.0)
    }
}

/// A record copied out of a heap page.
///
/// The payload layout is opaque to the heap file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    data: Bytes,
}

impl Record {
    /// Creates a record from its bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Copies a record out of a page buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the record bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the record length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the record has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the record and returns its payload.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
