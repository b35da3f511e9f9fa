//! Append-only insertion into a heap file.

use super::constants::MAX_RECORD_LEN;
use super::file::{HeapFile, PinnedPage};
use super::page::DataPage;
use crate::buffer::BufferManager;
use crate::disk::DiskManager;
use crate::record::RecordId;
use keel_common::{KeelError, Result};
use std::sync::Arc;
use tracing::debug;

/// Appends records to the tail of a heap file, growing the page chain when
/// the last page fills up.
pub struct InsertScan<B: BufferManager + ?Sized> {
    heap: HeapFile<B>,
}

impl<B: BufferManager + ?Sized> InsertScan<B> {
    /// Opens a heap file for insertion, positioned on its last data page.
    pub fn open(disk: Arc<DiskManager>, buffer: Arc<B>, name: &str) -> Result<Self> {
        let mut inserter = Self {
            heap: HeapFile::open(disk, buffer, name)?,
        };
        inserter.seek_last_page()?;
        Ok(inserter)
    }

    /// Makes the header's last page current. Another handle on the same
    /// file may have appended pages since this one last looked.
    fn seek_last_page(&mut self) -> Result<()> {
        let last_page = self.heap.last_page();
        if self.heap.current_page_num() != Some(last_page) {
            self.heap.release_current()?;
            self.heap.pin_current(last_page)?;
        }
        Ok(())
    }

    /// Inserts a record and returns its id.
    ///
    /// Records longer than a page can ever hold fail with
    /// `InvalidRecordLength` before anything is touched.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<RecordId> {
        if record.len() > MAX_RECORD_LEN {
            return Err(KeelError::InvalidRecordLength {
                len: record.len(),
                max: MAX_RECORD_LEN,
            });
        }

        match self.insert_into_current(record) {
            Err(KeelError::PageFull) => {}
            result => return result,
        }

        self.append_page()?;
        self.insert_into_current(record)
    }

    fn insert_into_current(&mut self, record: &[u8]) -> Result<RecordId> {
        self.seek_last_page()?;
        let page = self.heap.current.as_mut().ok_or(KeelError::NoCurrentRecord)?;

        let slot_id = DataPage::new(&mut page.frame.write_data()[..]).insert_record(record)?;
        page.dirty = true;
        let rid = RecordId::new(page.page_num, slot_id);

        self.heap.current_rid = Some(rid);
        self.heap.update_header(|header| header.rec_cnt += 1)?;
        Ok(rid)
    }

    /// Allocates a fresh page, links it after the current page and makes it
    /// current. Steps already taken are not undone if a later one fails.
    fn append_page(&mut self) -> Result<()> {
        let file_id = self.heap.file_id;
        let Some(mut old_page) = self.heap.current.take() else {
            return Err(KeelError::Internal(
                "no current page to link a new page to".to_string(),
            ));
        };

        let (page_num, frame) = match self.heap.buffer.alloc_page(file_id) {
            Ok(allocated) => allocated,
            Err(e) => {
                self.heap.current = Some(old_page);
                return Err(e);
            }
        };
        DataPage::new(&mut frame.write_data()[..]).init(page_num);
        DataPage::new(&mut old_page.frame.write_data()[..]).set_next_page(Some(page_num));
        old_page.dirty = true;

        self.heap.current = Some(PinnedPage {
            page_num,
            frame,
            // Initialised in memory, so it must be written back
            dirty: true,
        });
        self.heap.current_rid = None;

        self.heap
            .buffer
            .unpin_page(file_id, old_page.page_num, old_page.dirty)?;

        self.heap.update_header(|header| {
            header.last_page = page_num;
            header.page_cnt += 1;
        })?;
        debug!(file = %self.heap.name, from = old_page.page_num, to = page_num, "appended page");
        Ok(())
    }

    /// Returns the number of live records in the file.
    pub fn record_count(&self) -> u32 {
        self.heap.record_count()
    }

    /// Returns the underlying heap file.
    pub fn heap(&self) -> &HeapFile<B> {
        &self.heap
    }

    /// Releases the current page as modified and closes the heap file.
    pub fn close(mut self) -> Result<()> {
        self.mark_current_dirty();
        self.heap.shutdown()
    }

    fn mark_current_dirty(&mut self) {
        if let Some(page) = self.heap.current.as_mut() {
            page.dirty = true;
        }
    }
}

impl<B: BufferManager + ?Sized> Drop for InsertScan<B> {
    fn drop(&mut self) {
        self.mark_current_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DiskBufferManager;
    use crate::disk::DiskManagerConfig;
    use crate::heap::constants::{DATA_PAGE_HEADER_SIZE, SLOT_SIZE};
    use crate::heap::{HeapScan, create_heap_file};
    use keel_buffer::BufferPoolConfig;
    use keel_common::page::PAGE_SIZE;
    use tempfile::tempdir;

    /// Fills a fresh page with exactly two records.
    const HALF_PAGE_RECORD: usize = (PAGE_SIZE - DATA_PAGE_HEADER_SIZE) / 2 - SLOT_SIZE;

    struct TestEnv {
        disk: Arc<DiskManager>,
        buffer: Arc<DiskBufferManager>,
        _dir: tempfile::TempDir,
    }

    fn create_test_env() -> TestEnv {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let buffer = Arc::new(DiskBufferManager::new(
            Arc::clone(&disk),
            BufferPoolConfig { num_frames: 8 },
        ));
        create_heap_file(&*disk, &*buffer, "t1").unwrap();
        TestEnv {
            disk,
            buffer,
            _dir: dir,
        }
    }

    fn open_insert(env: &TestEnv) -> InsertScan<DiskBufferManager> {
        InsertScan::open(Arc::clone(&env.disk), Arc::clone(&env.buffer), "t1").unwrap()
    }

    #[test]
    fn test_insert_record() {
        let env = create_test_env();
        let mut inserter = open_insert(&env);

        let rid = inserter.insert_record(b"first").unwrap();
        assert_eq!(rid.page_num, inserter.heap().first_page());
        assert_eq!(inserter.record_count(), 1);
        assert_eq!(inserter.heap().current_rid(), Some(rid));
        inserter.close().unwrap();

        assert_eq!(env.buffer.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_insert_oversized_record() {
        let env = create_test_env();
        let mut inserter = open_insert(&env);

        let result = inserter.insert_record(&vec![0u8; MAX_RECORD_LEN + 1]);
        assert!(matches!(
            result,
            Err(KeelError::InvalidRecordLength { max: MAX_RECORD_LEN, .. })
        ));
        assert_eq!(inserter.record_count(), 0);
        assert_eq!(inserter.heap().page_count(), 2);

        inserter.insert_record(&vec![0u8; MAX_RECORD_LEN]).unwrap();
        assert_eq!(inserter.heap().page_count(), 2);
    }

    #[test]
    fn test_insert_overflow_links_new_page() {
        let env = create_test_env();
        let mut inserter = open_insert(&env);
        let record = vec![0xABu8; HALF_PAGE_RECORD];

        let r1 = inserter.insert_record(&record).unwrap();
        let r2 = inserter.insert_record(&record).unwrap();
        assert_eq!(r1.page_num, r2.page_num);
        assert_eq!(inserter.heap().page_count(), 2);

        let r3 = inserter.insert_record(&record).unwrap();
        assert_ne!(r3.page_num, r1.page_num);
        assert_eq!(r3.slot_id.0, 0);
        assert_eq!(inserter.heap().page_count(), 3);
        assert_eq!(inserter.heap().last_page(), r3.page_num);
        inserter.close().unwrap();

        let mut scan =
            HeapScan::open(Arc::clone(&env.disk), Arc::clone(&env.buffer), "t1").unwrap();
        assert_eq!(scan.next().unwrap(), Some(r1));
        assert_eq!(scan.next().unwrap(), Some(r2));
        assert_eq!(scan.next().unwrap(), Some(r3));
        assert_eq!(scan.next().unwrap(), None);
    }

    #[test]
    fn test_insert_reopen_appends_to_last_page() {
        let env = create_test_env();
        let record = vec![1u8; HALF_PAGE_RECORD];

        let mut inserter = open_insert(&env);
        for _ in 0..3 {
            inserter.insert_record(&record).unwrap();
        }
        let last_page = inserter.heap().last_page();
        inserter.close().unwrap();

        let mut inserter = open_insert(&env);
        let rid = inserter.insert_record(b"tail").unwrap();
        assert_eq!(rid.page_num, last_page);
        assert_eq!(inserter.record_count(), 4);
        assert_eq!(inserter.heap().page_count(), 3);
    }

    #[test]
    fn test_inserters_share_page_chain() {
        let env = create_test_env();
        let record = vec![7u8; HALF_PAGE_RECORD];

        let mut first = open_insert(&env);
        let mut second = open_insert(&env);
        first.insert_record(&record).unwrap();
        first.insert_record(&record).unwrap();
        let appended = first.insert_record(&record).unwrap();

        // The second inserter follows the page the first one appended
        let rid = second.insert_record(b"tail").unwrap();
        assert_eq!(rid.page_num, appended.page_num);
        assert_eq!(second.record_count(), 4);
        assert_eq!(second.heap().page_count(), 3);
        first.close().unwrap();
        second.close().unwrap();

        let mut scan =
            HeapScan::open(Arc::clone(&env.disk), Arc::clone(&env.buffer), "t1").unwrap();
        let mut seen = 0;
        while scan.next().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert_eq!(scan.record_count(), 4);
    }

    #[test]
    fn test_insert_drop_persists_records() {
        let env = create_test_env();

        {
            let mut inserter = open_insert(&env);
            inserter.insert_record(b"kept").unwrap();
        }

        let mut scan =
            HeapScan::open(Arc::clone(&env.disk), Arc::clone(&env.buffer), "t1").unwrap();
        assert_eq!(scan.record_count(), 1);
        assert!(scan.next().unwrap().is_some());
        assert_eq!(scan.get_current_record().unwrap().data(), b"kept");
    }
}
