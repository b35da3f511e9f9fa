//! Filtered sequential scan over a heap file.

use super::file::HeapFile;
use super::page::DataPage;
use super::predicate::{Datatype, Operator, ScanPredicate};
use crate::buffer::BufferManager;
use crate::disk::DiskManager;
use crate::record::{Record, RecordId};
use keel_common::{KeelError, Result};
use std::sync::Arc;
use tracing::debug;

/// Cursor snapshot taken by `mark_position`.
#[derive(Debug, Clone, Copy)]
struct ScanMark {
    page_num: Option<u32>,
    rid: Option<RecordId>,
    finished: bool,
}

enum Step {
    Found { rid: RecordId, matched: bool },
    EndOfPage { next_page: Option<u32> },
}

/// Forward-only scan over every live record of a heap file, in page order
/// and then slot order, optionally filtered by a [`ScanPredicate`].
pub struct HeapScan<B: BufferManager + ?Sized> {
    heap: HeapFile<B>,
    predicate: Option<ScanPredicate>,
    mark: ScanMark,
    /// Set once the chain is exhausted or the scan is ended.
    finished: bool,
}

impl<B: BufferManager + ?Sized> HeapScan<B> {
    /// Opens a heap file for scanning, positioned before its first record.
    pub fn open(disk: Arc<DiskManager>, buffer: Arc<B>, name: &str) -> Result<Self> {
        let heap = HeapFile::open(disk, buffer, name)?;
        let mark = ScanMark {
            page_num: heap.current_page_num(),
            rid: None,
            finished: false,
        };
        Ok(Self {
            heap,
            predicate: None,
            mark,
            finished: false,
        })
    }

    /// Configures the filter. Without a filter value every record matches.
    ///
    /// Must be called before the first `next`.
    pub fn start_scan(
        &mut self,
        offset: usize,
        length: usize,
        datatype: Datatype,
        filter: Option<&[u8]>,
        op: Operator,
    ) -> Result<()> {
        self.predicate = match filter {
            Some(filter) => Some(ScanPredicate::new(offset, length, datatype, filter, op)?),
            None => None,
        };
        Ok(())
    }

    /// Advances to the next matching record.
    ///
    /// Returns `Ok(None)` once the chain is exhausted, and keeps doing so on
    /// later calls. If a failed page switch left the scan without a current
    /// page, later calls fail with `NoCurrentRecord` until the cursor is
    /// moved by `reset_to_mark` or `get_record`.
    pub fn next(&mut self) -> Result<Option<RecordId>> {
        loop {
            let Some(page) = self.heap.current.as_ref() else {
                if self.finished {
                    return Ok(None);
                }
                return Err(KeelError::NoCurrentRecord);
            };

            let step = {
                let data = page.frame.read_data();
                let view = DataPage::new(&data[..]);
                let candidate = match self.heap.current_rid {
                    None => view.first_record(),
                    Some(rid) => view.next_record(rid.slot_id),
                };
                match candidate {
                    Some(slot_id) => {
                        let record = view.get_record(slot_id)?;
                        Step::Found {
                            rid: RecordId::new(page.page_num, slot_id),
                            matched: self.predicate.as_ref().is_none_or(|p| p.matches(record)),
                        }
                    }
                    // Read before the page is released
                    None => Step::EndOfPage {
                        next_page: view.next_page(),
                    },
                }
            };

            match step {
                Step::Found { rid, matched } => {
                    self.heap.current_rid = Some(rid);
                    if matched {
                        return Ok(Some(rid));
                    }
                }
                Step::EndOfPage { next_page } => {
                    self.heap.release_current()?;
                    self.heap.current_rid = None;
                    match next_page {
                        None => {
                            debug!(file = %self.heap.name, "scan reached end of file");
                            self.finished = true;
                            return Ok(None);
                        }
                        Some(page_num) => {
                            self.heap.pin_current(page_num)?;
                            debug!(file = %self.heap.name, page = page_num, "scan moved to next page");
                        }
                    }
                }
            }
        }
    }

    /// Returns the record under the cursor.
    pub fn get_current_record(&self) -> Result<Record> {
        let rid = self.current_on_page()?;
        self.heap.read_current(rid.slot_id)
    }

    /// Saves the cursor so `reset_to_mark` can return to it.
    pub fn mark_position(&mut self) {
        self.mark = ScanMark {
            page_num: self.heap.current_page_num(),
            rid: self.heap.current_rid,
            finished: self.finished,
        };
    }

    /// Restores the cursor saved by `mark_position`.
    ///
    /// Staying on the same page keeps its dirty flag; moving re-pins the
    /// marked page, even after the scan ran off the end.
    pub fn reset_to_mark(&mut self) -> Result<()> {
        if self.mark.page_num != self.heap.current_page_num() {
            self.heap.release_current()?;
            if let Some(page_num) = self.mark.page_num {
                self.heap.pin_current(page_num)?;
            }
        }
        self.heap.current_rid = self.mark.rid;
        self.finished = self.mark.finished;
        Ok(())
    }

    /// Deletes the record under the cursor without moving the cursor.
    pub fn delete_current(&mut self) -> Result<()> {
        let rid = self.current_on_page()?;
        let page = self.heap.current.as_mut().ok_or(KeelError::NoCurrentRecord)?;

        DataPage::new(&mut page.frame.write_data()[..]).delete_record(rid.slot_id)?;
        page.dirty = true;
        self.heap
            .update_header(|header| header.rec_cnt = header.rec_cnt.saturating_sub(1))
    }

    /// Overwrites the record under the cursor in place. The new bytes must
    /// not be longer than the old record.
    pub fn update_current(&mut self, record: &[u8]) -> Result<()> {
        let rid = self.current_on_page()?;
        let page = self.heap.current.as_mut().ok_or(KeelError::NoCurrentRecord)?;

        DataPage::new(&mut page.frame.write_data()[..]).update_record(rid.slot_id, record)?;
        page.dirty = true;
        Ok(())
    }

    /// Flags the current page as modified so it is written back on release.
    pub fn mark_dirty(&mut self) {
        if let Some(page) = self.heap.current.as_mut() {
            page.dirty = true;
        }
    }

    /// Releases the current page. Idempotent; `next` then reports the end.
    pub fn end_scan(&mut self) -> Result<()> {
        self.finished = true;
        self.heap.release_current()
    }

    /// Returns the number of live records in the file.
    pub fn record_count(&self) -> u32 {
        self.heap.record_count()
    }

    /// Reads a record by id, moving the cursor to it.
    pub fn get_record(&mut self, rid: RecordId) -> Result<Record> {
        let record = self.heap.get_record(rid)?;
        self.finished = false;
        Ok(record)
    }

    /// Returns the underlying heap file.
    pub fn heap(&self) -> &HeapFile<B> {
        &self.heap
    }

    /// Ends the scan and closes the heap file.
    pub fn close(self) -> Result<()> {
        self.heap.close()
    }

    fn current_on_page(&self) -> Result<RecordId> {
        match self.heap.current_rid {
            Some(rid) if self.heap.current_page_num() == Some(rid.page_num) => Ok(rid),
            _ => Err(KeelError::NoCurrentRecord),
        }
    }
}
