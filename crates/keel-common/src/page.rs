//! Page identifiers and constants for keel storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Page number used on disk to mean "no page", e.g. the end of a page chain.
pub const INVALID_PAGE: u32 = u32::MAX;

/// Unique identifier for a page within the buffer pool.
///
/// PageId consists of a file ID and page number within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier assigned by the disk manager when the file is opened.
    pub file_id: u32,
    /// Page number within the file (0-indexed).
    pub page_num: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Creates a PageId from a u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_num: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}

/// Page types in keel storage. Stored in the first byte of every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated or zeroed page.
    Free = 0,
    /// Heap file header page (page 0 of a heap file).
    HeapHeader = 1,
    /// Heap data page holding records.
    HeapData = 2,
}

impl PageType {
    /// Decodes a page type byte. Unknown values read as `Free`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => PageType::HeapHeader,
            2 => PageType::HeapData,
            _ => PageType::Free,
        }
    }
}
