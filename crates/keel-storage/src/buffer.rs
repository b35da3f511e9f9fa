//! Buffer manager seam between heap files and the page cache.

use crate::disk::{DiskManager, DiskManagerConfig};
use keel_buffer::{BufferFrame, BufferPool, BufferPoolConfig};
use keel_common::Result;
use keel_common::config::StorageConfig;
use keel_common::page::{PAGE_SIZE, PageId};
use std::sync::Arc;
use tracing::error;

/// Page access used by heap files.
///
/// Every frame handed out by `alloc_page` or `read_page` is pinned and must
/// be released by exactly one `unpin_page` call, which reports whether the
/// page was modified.
pub trait BufferManager: Send + Sync {
    /// Appends a new zeroed page to the file and returns it pinned.
    fn alloc_page(&self, file_id: u32) -> Result<(u32, Arc<BufferFrame>)>;

    /// Pins an existing page, reading it from disk if it is not cached.
    fn read_page(&self, file_id: u32, page_num: u32) -> Result<Arc<BufferFrame>>;

    /// Releases one pin on a page.
    fn unpin_page(&self, file_id: u32, page_num: u32, dirty: bool) -> Result<()>;

    /// Writes every dirty cached page of the file to disk.
    fn flush_file(&self, file_id: u32) -> Result<()>;
}

/// Buffer manager backed by a [`BufferPool`] and a [`DiskManager`].
///
/// Pages missing from the pool are read from disk on demand. Dirty pages
/// are written back when they are evicted or flushed; a victim whose
/// write-back fails stays cached and dirty.
pub struct DiskBufferManager {
    disk: Arc<DiskManager>,
    pool: BufferPool,
}

impl DiskBufferManager {
    /// Creates a buffer manager over an existing disk manager.
    pub fn new(disk: Arc<DiskManager>, config: BufferPoolConfig) -> Self {
        Self {
            disk,
            pool: BufferPool::new(config),
        }
    }

    /// Builds the disk manager and buffer pool described by a storage config.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let disk = Arc::new(DiskManager::new(DiskManagerConfig::from(config))?);
        Ok(Self::new(disk, BufferPoolConfig::from(config)))
    }

    /// Returns the disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the underlying buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Writes every dirty page in the pool to disk.
    pub fn flush_all(&self) -> Result<usize> {
        self.pool
            .flush_all(|page_id, data| self.disk.write_page(page_id, data))
    }

    fn write_back(&self, victim: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.disk.write_page(victim, data).inspect_err(|e| {
            error!(page = %victim, error = %e, "failed to write back evicted page");
        })
    }
}

impl BufferManager for DiskBufferManager {
    fn alloc_page(&self, file_id: u32) -> Result<(u32, Arc<BufferFrame>)> {
        let page_num = self.disk.allocate_page(file_id)?;
        let page_id = PageId::new(file_id, page_num);

        let frame = self
            .pool
            .new_page(page_id, |victim, data| self.write_back(victim, data))?;
        Ok((page_num, frame))
    }

    fn read_page(&self, file_id: u32, page_num: u32) -> Result<Arc<BufferFrame>> {
        let page_id = PageId::new(file_id, page_num);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        self.pool
            .load_page(page_id, &data[..], |victim, data| {
                self.write_back(victim, data)
            })
    }

    fn unpin_page(&self, file_id: u32, page_num: u32, dirty: bool) -> Result<()> {
        self.pool.unpin_page(PageId::new(file_id, page_num), dirty)
    }

    fn flush_file(&self, file_id: u32) -> Result<()> {
        self.pool
            .flush_file(file_id, |page_id, data| self.disk.write_page(page_id, data))?;
        Ok(())
    }
}
