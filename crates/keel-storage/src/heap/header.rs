//! Heap file header page.

use super::constants::{FILE_HEADER_SIZE, MAX_NAME_SIZE};
use keel_common::page::PageType;

/// Metadata stored on page 0 of every heap file.
///
/// Layout (20 bytes + name):
/// - page_type: 1 byte (`PageType::HeapHeader`)
/// - reserved: 1 byte
/// - name_len: 2 bytes
/// - page_cnt: 4 bytes (header page plus data pages)
/// - rec_cnt: 4 bytes (live records)
/// - first_page: 4 bytes
/// - last_page: 4 bytes
/// - name: `name_len` bytes, at most `MAX_NAME_SIZE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapFileHeader {
    pub name: String,
    pub page_cnt: u32,
    pub rec_cnt: u32,
    pub first_page: u32,
    pub last_page: u32,
}

impl HeapFileHeader {
    /// Creates the header of a fresh file with one empty data page.
    pub fn new(name: &str, data_page: u32) -> Self {
        Self {
            name: truncate_name(name).to_string(),
            page_cnt: 2,
            rec_cnt: 0,
            first_page: data_page,
            last_page: data_page,
        }
    }

    /// Writes the header into the start of a page buffer.
    pub fn write_to(&self, page: &mut [u8]) {
        let name = truncate_name(&self.name).as_bytes();

        page[0] = PageType::HeapHeader as u8;
        page[1] = 0;
        page[2..4].copy_from_slice(&(name.len() as u16).to_le_bytes());
        page[4..8].copy_from_slice(&self.page_cnt.to_le_bytes());
        page[8..12].copy_from_slice(&self.rec_cnt.to_le_bytes());
        page[12..16].copy_from_slice(&self.first_page.to_le_bytes());
        page[16..20].copy_from_slice(&self.last_page.to_le_bytes());
        page[FILE_HEADER_SIZE..FILE_HEADER_SIZE + name.len()].copy_from_slice(name);
    }

    /// Reads a header from a page buffer.
    ///
    /// Returns None if the page is not a heap header page.
    pub fn from_bytes(page: &[u8]) -> Option<Self> {
        if page.len() < FILE_HEADER_SIZE + MAX_NAME_SIZE
            || PageType::from_byte(page[0]) != PageType::HeapHeader
        {
            return None;
        }

        let read_u32 =
            |at: usize| u32::from_le_bytes([page[at], page[at + 1], page[at + 2], page[at + 3]]);
        let name_len = u16::from_le_bytes([page[2], page[3]]) as usize;
        if name_len > MAX_NAME_SIZE {
            return None;
        }
        let name = &page[FILE_HEADER_SIZE..FILE_HEADER_SIZE + name_len];

        Some(Self {
            name: String::from_utf8_lossy(name).into_owned(),
            page_cnt: read_u32(4),
            rec_cnt: read_u32(8),
            first_page: read_u32(12),
            last_page: read_u32(16),
        })
    }
}

/// Cuts a name to `MAX_NAME_SIZE` bytes without splitting a character.
fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_SIZE {
        return name;
    }
    let mut end = MAX_NAME_SIZE;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
