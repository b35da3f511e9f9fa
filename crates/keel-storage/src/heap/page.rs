//! Slotted data page for heap files.
//!
//! Page layout:
//! ```text
//! +------------------+
//! | Page Header (16) |
//! +------------------+
//! | Slot Array       |  <- Grows downward
//! | (4 bytes/slot)   |
//! +------------------+
//! |                  |
//! | Free Space       |
//! |                  |
//! +------------------+
//! | Record Data      |  <- Grows upward
//! +------------------+
//! ```
//!
//! Header layout:
//! - page_type: 1 byte
//! - reserved: 1 byte
//! - slot_count: 2 bytes
//! - free_space_start: 2 bytes (end of slot array)
//! - free_space_end: 2 bytes (start of record data)
//! - page_num: 4 bytes
//! - next_page: 4 bytes (`INVALID_PAGE` ends the chain)

use super::constants::{DATA_PAGE_HEADER_SIZE, MAX_RECORD_LEN, SLOT_SIZE};
use keel_common::page::{INVALID_PAGE, PAGE_SIZE, PageType};
use keel_common::{KeelError, Result};

/// Slot identifier within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u16);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// A slot in the slot array pointing to record data.
///
/// Live records always sit past the slot array, so an offset of 0 marks a
/// deleted slot and zero-length records stay representable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RecordSlot {
    offset: u16,
    length: u16,
}

impl RecordSlot {
    const DELETED: RecordSlot = RecordSlot {
        offset: 0,
        length: 0,
    };

    fn is_deleted(&self) -> bool {
        self.offset == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct DataPageHeader {
    slot_count: u16,
    free_space_start: u16,
    free_space_end: u16,
}

impl DataPageHeader {
    fn free_space(&self) -> usize {
        (self.free_space_end as usize).saturating_sub(self.free_space_start as usize)
    }
}

/// A view over one heap data page.
///
/// Works over any byte buffer: `&[u8]` for reads from a pinned frame,
/// `&mut [u8]` for in-place updates, or an owned `Vec<u8>`.
pub struct DataPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> DataPage<B> {
    /// Wraps a page buffer. The buffer must be `PAGE_SIZE` bytes long.
    pub fn new(data: B) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    #[inline]
    fn read_u16(&self, offset: usize) -> u16 {
        let bytes = self.bytes();
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        let bytes = self.bytes();
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    fn header(&self) -> DataPageHeader {
        DataPageHeader {
            slot_count: self.read_u16(2),
            free_space_start: self.read_u16(4),
            free_space_end: self.read_u16(6),
        }
    }

    fn slot(&self, slot_id: SlotId) -> Option<RecordSlot> {
        if slot_id.0 >= self.header().slot_count {
            return None;
        }
        let offset = DATA_PAGE_HEADER_SIZE + slot_id.0 as usize * SLOT_SIZE;
        Some(RecordSlot {
            offset: self.read_u16(offset),
            length: self.read_u16(offset + 2),
        })
    }

    /// Returns the page type recorded in the first byte.
    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.bytes()[0])
    }

    /// Returns the page number the page was initialised with.
    pub fn page_num(&self) -> u32 {
        self.read_u32(8)
    }

    /// Returns the successor in the page chain, or None at the end.
    pub fn next_page(&self) -> Option<u32> {
        match self.read_u32(12) {
            INVALID_PAGE => None,
            page_num => Some(page_num),
        }
    }

    /// Returns the number of slots, including deleted ones.
    pub fn slot_count(&self) -> u16 {
        self.header().slot_count
    }

    /// Returns the contiguous free space between the slot array and record data.
    pub fn free_space(&self) -> usize {
        self.header().free_space()
    }

    /// Returns the number of live records.
    pub fn record_count(&self) -> usize {
        (0..self.slot_count())
            .filter_map(|i| self.slot(SlotId(i)))
            .filter(|slot| !slot.is_deleted())
            .count()
    }

    /// Returns the bytes of the record in the given slot.
    pub fn get_record(&self, slot_id: SlotId) -> Result<&[u8]> {
        let slot = self
            .slot(slot_id)
            .ok_or_else(|| KeelError::RecordNotFound(format!("{} does not exist", slot_id)))?;
        if slot.is_deleted() {
            return Err(KeelError::RecordNotFound(format!("{} is deleted", slot_id)));
        }
        let start = slot.offset as usize;
        Ok(&self.bytes()[start..start + slot.length as usize])
    }

    /// Returns the first live slot, or None if the page holds no records.
    pub fn first_record(&self) -> Option<SlotId> {
        self.live_slot_from(0)
    }

    /// Returns the next live slot after `slot_id`.
    ///
    /// `slot_id` itself may have been deleted; only its position matters.
    pub fn next_record(&self, slot_id: SlotId) -> Option<SlotId> {
        self.live_slot_from(slot_id.0.checked_add(1)?)
    }

    fn live_slot_from(&self, start: u16) -> Option<SlotId> {
        (start..self.slot_count())
            .map(SlotId)
            .find(|&slot_id| self.slot(slot_id).is_some_and(|slot| !slot.is_deleted()))
    }

    /// Calculates space held by deleted record data that compaction would free.
    pub fn reclaimable_space(&self) -> usize {
        let header = self.header();
        let live: usize = (0..header.slot_count)
            .filter_map(|i| self.slot(SlotId(i)))
            .filter(|slot| !slot.is_deleted())
            .map(|slot| slot.length as usize)
            .sum();

        let record_area = PAGE_SIZE.saturating_sub(header.free_space_end as usize);
        record_area.saturating_sub(live)
    }

    /// Returns free space plus space reclaimable by compaction.
    pub fn total_usable_space(&self) -> usize {
        self.free_space() + self.reclaimable_space()
    }

    fn first_deleted_slot(&self) -> Option<SlotId> {
        (0..self.slot_count())
            .map(SlotId)
            .find(|&slot_id| self.slot(slot_id).is_some_and(|slot| slot.is_deleted()))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataPage<B> {
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    #[inline]
    fn write_u16(&mut self, offset: usize, value: u16) {
        self.bytes_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn set_header(&mut self, header: DataPageHeader) {
        self.write_u16(2, header.slot_count);
        self.write_u16(4, header.free_space_start);
        self.write_u16(6, header.free_space_end);
    }

    fn set_slot(&mut self, slot_id: SlotId, slot: RecordSlot) {
        let offset = DATA_PAGE_HEADER_SIZE + slot_id.0 as usize * SLOT_SIZE;
        self.write_u16(offset, slot.offset);
        self.write_u16(offset + 2, slot.length);
    }

    /// Clears the page to an empty data page with no successor.
    pub fn init(&mut self, page_num: u32) {
        self.bytes_mut().fill(0);
        self.bytes_mut()[0] = PageType::HeapData as u8;
        self.set_header(DataPageHeader {
            slot_count: 0,
            free_space_start: DATA_PAGE_HEADER_SIZE as u16,
            free_space_end: PAGE_SIZE as u16,
        });
        self.write_u32(8, page_num);
        self.write_u32(12, INVALID_PAGE);
    }

    /// Links the page to its successor, or ends the chain with None.
    pub fn set_next_page(&mut self, next: Option<u32>) {
        self.write_u32(12, next.unwrap_or(INVALID_PAGE));
    }

    /// Inserts a record and returns its slot.
    ///
    /// Reuses a deleted slot when one exists and compacts the page when
    /// fragmented space would make the record fit. Fails with `PageFull`
    /// otherwise.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<SlotId> {
        if record.len() > MAX_RECORD_LEN {
            return Err(KeelError::InvalidRecordLength {
                len: record.len(),
                max: MAX_RECORD_LEN,
            });
        }

        let reuse_slot = self.first_deleted_slot();
        let space_needed = match reuse_slot {
            Some(_) => record.len(),
            None => record.len() + SLOT_SIZE,
        };

        let mut header = self.header();
        if header.free_space() < space_needed {
            if self.total_usable_space() < space_needed {
                return Err(KeelError::PageFull);
            }
            self.compact();
            header = self.header();
        }

        // Allocate record space (grows upward from end)
        header.free_space_end -= record.len() as u16;
        let record_offset = header.free_space_end;
        let start = record_offset as usize;
        self.bytes_mut()[start..start + record.len()].copy_from_slice(record);

        let slot_id = match reuse_slot {
            Some(slot_id) => slot_id,
            None => {
                let slot_id = SlotId(header.slot_count);
                header.slot_count += 1;
                header.free_space_start += SLOT_SIZE as u16;
                slot_id
            }
        };

        self.set_slot(
            slot_id,
            RecordSlot {
                offset: record_offset,
                length: record.len() as u16,
            },
        );
        self.set_header(header);

        Ok(slot_id)
    }

    /// Deletes the record in the given slot. Surviving slots keep their ids.
    pub fn delete_record(&mut self, slot_id: SlotId) -> Result<()> {
        // Validates that the slot holds a live record
        self.get_record(slot_id)?;
        self.set_slot(slot_id, RecordSlot::DELETED);
        Ok(())
    }

    /// Overwrites a record in place. The new bytes must not be longer than
    /// the old ones.
    pub fn update_record(&mut self, slot_id: SlotId, record: &[u8]) -> Result<()> {
        let old_len = self.get_record(slot_id)?.len();
        if record.len() > old_len {
            return Err(KeelError::PageFull);
        }

        let Some(slot) = self.slot(slot_id) else {
            return Err(KeelError::RecordNotFound(format!("{} does not exist", slot_id)));
        };
        let start = slot.offset as usize;
        self.bytes_mut()[start..start + record.len()].copy_from_slice(record);
        self.set_slot(
            slot_id,
            RecordSlot {
                offset: slot.offset,
                length: record.len() as u16,
            },
        );
        Ok(())
    }

    /// Moves all live records to the end of the page, removing holes left
    /// by deletes and shrunken updates.
    pub fn compact(&mut self) {
        let header = self.header();

        let mut live_records: Vec<(SlotId, Vec<u8>)> = Vec::new();
        for i in 0..header.slot_count {
            let slot_id = SlotId(i);
            if let Ok(record) = self.get_record(slot_id) {
                live_records.push((slot_id, record.to_vec()));
            }
        }

        let mut free_space_end = PAGE_SIZE as u16;
        for (slot_id, record) in &live_records {
            free_space_end -= record.len() as u16;
            let start = free_space_end as usize;
            self.bytes_mut()[start..start + record.len()].copy_from_slice(record);
            self.set_slot(
                *slot_id,
                RecordSlot {
                    offset: free_space_end,
                    length: record.len() as u16,
                },
            );
        }

        self.set_header(DataPageHeader {
            free_space_end,
            ..header
        });
    }
}
