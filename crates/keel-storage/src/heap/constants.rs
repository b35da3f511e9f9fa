//! Heap file layout constants.

use keel_common::page::PAGE_SIZE;

/// Size of the data page header in bytes.
pub const DATA_PAGE_HEADER_SIZE: usize = 16;

/// Size of a record slot entry in bytes.
pub const SLOT_SIZE: usize = 4;

/// Largest record an empty data page accepts.
pub const MAX_RECORD_LEN: usize = PAGE_SIZE - DATA_PAGE_HEADER_SIZE - SLOT_SIZE;

/// Longest file name stored in a heap file header, in bytes.
pub const MAX_NAME_SIZE: usize = 50;

/// Fixed part of the heap file header page, before the name bytes.
pub const FILE_HEADER_SIZE: usize = 20;
