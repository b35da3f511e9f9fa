//! Open heap file state shared by scans and inserts.
//!
//! An open [`HeapFile`] keeps the header page pinned for its whole lifetime
//! and at most one data page pinned as the "current" page. Every pin taken
//! here is released exactly once, on success and error paths alike.

use super::header::HeapFileHeader;
use super::page::{DataPage, SlotId};
use crate::buffer::BufferManager;
use crate::disk::DiskManager;
use crate::record::{Record, RecordId};
use keel_buffer::BufferFrame;
use keel_common::page::{PageId, PageType};
use keel_common::{KeelError, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A page pinned by an open heap file, with the dirty flag it will be
/// released with.
pub(crate) struct PinnedPage {
    pub(crate) page_num: u32,
    pub(crate) frame: Arc<BufferFrame>,
    pub(crate) dirty: bool,
}

/// An open heap file.
///
/// Holds the header page and one current data page pinned, and caches the
/// last accessed page so page-local record lookups need no extra pin.
/// Header fields are always read from the pinned header frame, so every
/// handle open on the same file sees the others' updates. Dropping an open
/// heap file runs the same teardown as [`HeapFile::close`] and logs any
/// failure.
pub struct HeapFile<B: BufferManager + ?Sized> {
    pub(crate) disk: Arc<DiskManager>,
    pub(crate) buffer: Arc<B>,
    pub(crate) file_id: u32,
    pub(crate) name: String,
    pub(crate) header: Option<PinnedPage>,
    pub(crate) current: Option<PinnedPage>,
    pub(crate) current_rid: Option<RecordId>,
    open: bool,
}

impl<B: BufferManager + ?Sized> HeapFile<B> {
    /// Opens an existing heap file.
    ///
    /// Pins the header page and the first data page. Fails with
    /// `OpenFailed` if the file cannot be opened; pin failures are returned
    /// unchanged after the pins already taken are released and the file is
    /// closed again.
    pub fn open(disk: Arc<DiskManager>, buffer: Arc<B>, name: &str) -> Result<Self> {
        let file_id = disk.open_file(name).map_err(|e| KeelError::OpenFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        match Self::pin_initial_pages(&disk, &*buffer, file_id) {
            Ok((header, page_cnt, current)) => {
                info!(file = name, file_id, pages = page_cnt, "opened heap file");
                Ok(Self {
                    disk,
                    buffer,
                    file_id,
                    name: name.to_string(),
                    header: Some(header),
                    current: Some(current),
                    current_rid: None,
                    open: true,
                })
            }
            Err(e) => {
                if let Err(close_err) = disk.close_file(file_id) {
                    error!(file = name, error = %close_err, "failed to close heap file after open error");
                }
                Err(e)
            }
        }
    }

    fn pin_initial_pages(
        disk: &DiskManager,
        buffer: &B,
        file_id: u32,
    ) -> Result<(PinnedPage, u32, PinnedPage)> {
        let header_page_num = disk.first_page(file_id)?;
        let header_frame = buffer.read_page(file_id, header_page_num)?;

        let meta = HeapFileHeader::from_bytes(&header_frame.read_data()[..]);
        let Some(meta) = meta else {
            let _ = buffer.unpin_page(file_id, header_page_num, false);
            return Err(KeelError::PageCorrupted {
                page_id: PageId::new(file_id, header_page_num).as_u64(),
                reason: "not a heap file header".to_string(),
            });
        };

        let current_frame = match buffer.read_page(file_id, meta.first_page) {
            Ok(frame) => frame,
            Err(e) => {
                if let Err(unpin_err) = buffer.unpin_page(file_id, header_page_num, false) {
                    error!(file_id, error = %unpin_err, "failed to unpin header page after open error");
                }
                return Err(e);
            }
        };

        let header = PinnedPage {
            page_num: header_page_num,
            frame: header_frame,
            dirty: false,
        };
        let current = PinnedPage {
            page_num: meta.first_page,
            frame: current_frame,
            dirty: false,
        };
        Ok((header, meta.page_cnt, current))
    }

    /// Closes the heap file.
    ///
    /// Unpins the current page and the header page, flushes the file's dirty
    /// pages and closes the file. Every step runs even if an earlier one
    /// failed; the first failure is returned.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Teardown shared by `close`, `Drop` and the scan types. Idempotent.
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let mut first_err: Option<KeelError> = None;
        let records = self.record_count();

        if let Err(e) = self.release_current() {
            error!(file = %self.name, error = %e, "failed to unpin current page");
            first_err.get_or_insert(e);
        }

        if let Some(header) = self.header.take() {
            if let Err(e) = self
                .buffer
                .unpin_page(self.file_id, header.page_num, header.dirty)
            {
                error!(file = %self.name, error = %e, "failed to unpin header page");
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = self.buffer.flush_file(self.file_id) {
            error!(file = %self.name, error = %e, "failed to flush heap file");
            first_err.get_or_insert(e);
        }

        if let Err(e) = self.disk.close_file(self.file_id) {
            error!(file = %self.name, error = %e, "failed to close heap file");
            first_err.get_or_insert(e);
        }

        info!(file = %self.name, records, "closed heap file");
        first_err.map_or(Ok(()), Err)
    }

    /// Returns true until the file is closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file id assigned by the disk manager.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of live records.
    pub fn record_count(&self) -> u32 {
        self.header_field(|h| h.rec_cnt)
    }

    /// Returns the number of pages, including the header page.
    pub fn page_count(&self) -> u32 {
        self.header_field(|h| h.page_cnt)
    }

    /// Returns the first data page of the chain.
    pub fn first_page(&self) -> u32 {
        self.header_field(|h| h.first_page)
    }

    /// Returns the last data page of the chain.
    pub fn last_page(&self) -> u32 {
        self.header_field(|h| h.last_page)
    }

    /// Returns the record last visited or produced.
    pub fn current_rid(&self) -> Option<RecordId> {
        self.current_rid
    }

    /// Decodes the pinned header page. None once the file is closed.
    pub fn header(&self) -> Option<HeapFileHeader> {
        let header = self.header.as_ref()?;
        HeapFileHeader::from_bytes(&header.frame.read_data()[..])
    }

    fn header_field(&self, field: impl FnOnce(&HeapFileHeader) -> u32) -> u32 {
        self.header().map_or(0, |h| field(&h))
    }

    /// Reads a record by id.
    ///
    /// Moves the current page to `rid.page_num` if needed. If the record
    /// cannot be read from a page that was just pinned for it, that page is
    /// released again and the read failure is returned.
    pub fn get_record(&mut self, rid: RecordId) -> Result<Record> {
        if self.header.as_ref().is_some_and(|h| h.page_num == rid.page_num) {
            return Err(KeelError::RecordNotFound(format!(
                "page {} is the header page",
                rid.page_num
            )));
        }

        let switched = self.current_page_num() != Some(rid.page_num);
        if switched {
            self.release_current()?;
            self.pin_current(rid.page_num)?;
            debug!(file = %self.name, page = rid.page_num, "switched current page");
        }

        match self.read_current(rid.slot_id) {
            Ok(record) => {
                self.current_rid = Some(rid);
                Ok(record)
            }
            Err(e) => {
                if switched {
                    if let Err(unpin_err) = self.release_current() {
                        debug!(file = %self.name, error = %unpin_err, "ignoring unpin failure after read error");
                    }
                }
                Err(e)
            }
        }
    }

    /// Returns the page number of the pinned current page, if any.
    pub fn current_page_num(&self) -> Option<u32> {
        self.current.as_ref().map(|page| page.page_num)
    }

    /// Unpins the current page with its accumulated dirty flag.
    pub(crate) fn release_current(&mut self) -> Result<()> {
        match self.current.take() {
            Some(page) => self
                .buffer
                .unpin_page(self.file_id, page.page_num, page.dirty),
            None => Ok(()),
        }
    }

    /// Pins a data page as the current page. No page may be current.
    pub(crate) fn pin_current(&mut self, page_num: u32) -> Result<()> {
        debug_assert!(self.current.is_none());
        let frame = self.buffer.read_page(self.file_id, page_num)?;
        self.current = Some(PinnedPage {
            page_num,
            frame,
            dirty: false,
        });
        Ok(())
    }

    /// Copies a record out of the current page.
    pub(crate) fn read_current(&self, slot_id: SlotId) -> Result<Record> {
        let page = self.current.as_ref().ok_or(KeelError::NoCurrentRecord)?;
        let data = page.frame.read_data();
        let view = DataPage::new(&data[..]);

        if view.page_type() != PageType::HeapData {
            return Err(KeelError::PageCorrupted {
                page_id: PageId::new(self.file_id, page.page_num).as_u64(),
                reason: "not a heap data page".to_string(),
            });
        }
        Ok(Record::copy_from_slice(view.get_record(slot_id)?))
    }

    /// Applies a change to the pinned header page and marks it dirty.
    ///
    /// Decode, update and re-encode all happen under one frame write lock.
    pub(crate) fn update_header(
        &mut self,
        update: impl FnOnce(&mut HeapFileHeader),
    ) -> Result<()> {
        let header = self.header.as_mut().ok_or(KeelError::FileNotOpen {
            file_id: self.file_id,
        })?;
        {
            let mut data = header.frame.write_data();
            let mut decoded =
                HeapFileHeader::from_bytes(&data[..]).ok_or_else(|| KeelError::PageCorrupted {
                    page_id: PageId::new(self.file_id, header.page_num).as_u64(),
                    reason: "not a heap file header".to_string(),
                })?;
            update(&mut decoded);
            decoded.write_to(&mut data[..]);
        }
        header.dirty = true;
        Ok(())
    }
}

impl<B: BufferManager + ?Sized> Drop for HeapFile<B> {
    fn drop(&mut self) {
        // Failures were already reported by shutdown
        let _ = self.shutdown();
    }
}

/// Creates a new heap file with a header page and one empty data page.
///
/// Fails with `FileExists` if a file with this name is already present.
pub fn create_heap_file<B: BufferManager + ?Sized>(
    disk: &DiskManager,
    buffer: &B,
    name: &str,
) -> Result<()> {
    disk.create_file(name)?;
    let file_id = disk.open_file(name)?;

    let result = format_heap_file(buffer, file_id, name);
    let flushed = result.and_then(|()| buffer.flush_file(file_id));
    let closed = disk.close_file(file_id);

    flushed?;
    closed?;
    info!(file = name, file_id, "created heap file");
    Ok(())
}

fn format_heap_file<B: BufferManager + ?Sized>(buffer: &B, file_id: u32, name: &str) -> Result<()> {
    let (header_page_num, header_frame) = buffer.alloc_page(file_id)?;

    let (data_page_num, data_frame) = match buffer.alloc_page(file_id) {
        Ok(allocated) => allocated,
        Err(e) => {
            let _ = buffer.unpin_page(file_id, header_page_num, false);
            return Err(e);
        }
    };

    DataPage::new(&mut data_frame.write_data()[..]).init(data_page_num);
    HeapFileHeader::new(name, data_page_num).write_to(&mut header_frame.write_data()[..]);

    let data_unpinned = buffer.unpin_page(file_id, data_page_num, true);
    let header_unpinned = buffer.unpin_page(file_id, header_page_num, true);
    data_unpinned?;
    header_unpinned
}

/// Removes a heap file from disk. The file must not be open.
pub fn destroy_heap_file(disk: &DiskManager, name: &str) -> Result<()> {
    disk.destroy_file(name)?;
    info!(file = name, "destroyed heap file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DiskBufferManager;
    use crate::disk::DiskManagerConfig;
    use keel_buffer::BufferPoolConfig;
    use tempfile::tempdir;

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
            BufferPoolConfig { num_frames: 16 },
        ));
        TestEnv {
            disk,
            buffer,
            _dir: dir,
        }
    }

    fn open(env: &TestEnv, name: &str) -> Result<HeapFile<DiskBufferManager>> {
        HeapFile::open(Arc::clone(&env.disk), Arc::clone(&env.buffer), name)
    }

    fn put_record(env: &TestEnv, heap: &HeapFile<DiskBufferManager>, data: &[u8]) -> RecordId {
        let page_num = heap.first_page();
        let frame = env.buffer.read_page(heap.file_id(), page_num).unwrap();
        let slot_id = DataPage::new(&mut frame.write_data()[..])
            .insert_record(data)
            .unwrap();
        env.buffer
            .unpin_page(heap.file_id(), page_num, true)
            .unwrap();
        RecordId::new(page_num, slot_id)
    }

    #[test]
    fn test_create_heap_file() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        let heap = open(&env, "t1").unwrap();
        assert_eq!(heap.name(), "t1");
        assert_eq!(heap.page_count(), 2);
        assert_eq!(heap.record_count(), 0);
        assert_eq!(heap.first_page(), 1);
        assert_eq!(heap.last_page(), 1);
        assert_eq!(heap.header().unwrap().name, "t1");
        assert_eq!(heap.current_rid(), None);
        heap.close().unwrap();

        assert_eq!(env.buffer.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_create_heap_file_exists() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        assert!(matches!(
            create_heap_file(&*env.disk, &*env.buffer, "t1"),
            Err(KeelError::FileExists(_))
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let env = create_test_env();

        let result = open(&env, "missing");
        assert!(matches!(result, Err(KeelError::OpenFailed { .. })));
    }

    #[test]
    fn test_open_rejects_non_heap_file() {
        let env = create_test_env();
        env.disk.create_file("raw").unwrap();
        let file_id = env.disk.open_file("raw").unwrap();
        let (page_num, _) = env.buffer.alloc_page(file_id).unwrap();
        env.buffer.unpin_page(file_id, page_num, true).unwrap();
        env.buffer.flush_file(file_id).unwrap();
        env.disk.close_file(file_id).unwrap();

        let result = open(&env, "raw");
        assert!(matches!(result, Err(KeelError::PageCorrupted { .. })));

        // Error path released the header pin and closed the file
        assert_eq!(env.buffer.pool().stats().pinned_frames, 0);
        assert!(!env.disk.is_open("raw"));
    }

    #[test]
    fn test_get_record() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();
        let mut heap = open(&env, "t1").unwrap();

        let rid = put_record(&env, &heap, b"alpha");
        let record = heap.get_record(rid).unwrap();
        assert_eq!(record.data(), b"alpha");
        assert_eq!(heap.current_rid(), Some(rid));

        heap.close().unwrap();
        assert_eq!(env.buffer.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_get_record_missing_slot() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();
        let mut heap = open(&env, "t1").unwrap();

        let rid = RecordId::new(heap.first_page(), SlotId(3));
        assert!(matches!(
            heap.get_record(rid),
            Err(KeelError::RecordNotFound(_))
        ));
        assert_eq!(heap.current_rid(), None);
    }

    #[test]
    fn test_get_record_header_page() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();
        let mut heap = open(&env, "t1").unwrap();

        let rid = RecordId::new(0, SlotId(0));
        assert!(matches!(
            heap.get_record(rid),
            Err(KeelError::RecordNotFound(_))
        ));
        // Current page untouched
        assert_eq!(heap.current_page_num(), Some(heap.first_page()));
    }

    #[test]
    fn test_get_record_missing_page_releases_nothing_extra() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();
        let mut heap = open(&env, "t1").unwrap();

        let rid = RecordId::new(42, SlotId(0));
        assert!(matches!(
            heap.get_record(rid),
            Err(KeelError::PageNotFound { .. })
        ));
        assert_eq!(heap.current_page_num(), None);

        // Only the header stays pinned
        assert_eq!(env.buffer.pool().stats().pinned_frames, 1);
        heap.close().unwrap();
        assert_eq!(env.buffer.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_update_header_persists_on_close() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        let mut heap = open(&env, "t1").unwrap();
        heap.update_header(|h| h.rec_cnt = 7).unwrap();
        heap.close().unwrap();

        let heap = open(&env, "t1").unwrap();
        assert_eq!(heap.record_count(), 7);
    }

    #[test]
    fn test_header_shared_between_handles() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        let mut first = open(&env, "t1").unwrap();
        let mut second = open(&env, "t1").unwrap();
        first.update_header(|h| h.rec_cnt += 2).unwrap();
        second.update_header(|h| h.rec_cnt += 3).unwrap();

        assert_eq!(first.record_count(), 5);
        assert_eq!(second.record_count(), 5);
        first.close().unwrap();
        second.close().unwrap();

        let heap = open(&env, "t1").unwrap();
        assert_eq!(heap.record_count(), 5);
    }

    #[test]
    fn test_closed_file_has_no_header() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        let mut heap = open(&env, "t1").unwrap();
        heap.shutdown().unwrap();

        assert!(heap.header().is_none());
        assert_eq!(heap.record_count(), 0);
        assert!(matches!(
            heap.update_header(|h| h.rec_cnt = 1),
            Err(KeelError::FileNotOpen { .. })
        ));
    }

    #[test]
    fn test_drop_closes_file() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        {
            let heap = open(&env, "t1").unwrap();
            assert!(heap.is_open());
            assert!(env.disk.is_open("t1"));
        }

        assert!(!env.disk.is_open("t1"));
        assert_eq!(env.buffer.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_destroy_heap_file() {
        let env = create_test_env();
        create_heap_file(&*env.disk, &*env.buffer, "t1").unwrap();

        let heap = open(&env, "t1").unwrap();
        assert!(matches!(
            destroy_heap_file(&env.disk, "t1"),
            Err(KeelError::FileOpen(_))
        ));
        heap.close().unwrap();

        destroy_heap_file(&env.disk, "t1").unwrap();
        assert!(matches!(
            open(&env, "t1"),
            Err(KeelError::OpenFailed { .. })
        ));
        assert!(matches!(
            destroy_heap_file(&env.disk, "t1"),
            Err(KeelError::FileNotFound(_))
        ));
    }
}
