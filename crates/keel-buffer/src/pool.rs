//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{ClockReplacer, Replacer};
use keel_common::config::StorageConfig;
use keel_common::page::{PAGE_SIZE, PageId};
use keel_common::{KeelError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

/// Page table and free list, guarded together so that lookups, pins and
/// evictions observe a consistent view.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction of unpinned frames
/// - Pin counting and dirty tracking per frame
///
/// The pool never touches disk. Pages are loaded by the caller, and dirty
/// victims go through a caller-supplied write-back before their frame is
/// reused.
pub struct BufferPool {
    config: BufferPoolConfig,
    frames: Vec<Arc<BufferFrame>>,
    state: Mutex<PoolState>,
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames = (0..num_frames)
            .map(|i| Arc::new(BufferFrame::new(FrameId(i as u32))))
            .collect();

        // Pop from the back hands out frame 0 first
        let free_list = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(num_frames),
                free_list,
            }),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    #[inline]
    fn frame(&self, frame_id: FrameId) -> &Arc<BufferFrame> {
        &self.frames[frame_id.as_usize()]
    }

    /// Fetches a page from the buffer pool.
    ///
    /// If the page is not in the pool, returns None.
    /// The page is pinned before being returned.
    pub fn fetch_page(&self, page_id: PageId) -> Option<Arc<BufferFrame>> {
        let state = self.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        let frame = self.frame(frame_id);
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(Arc::clone(frame))
    }

    /// Claims a frame for a new page.
    ///
    /// Tries the free list first, then evicts an unpinned frame. A dirty
    /// victim is handed to `write_back` before its frame is reused; if that
    /// fails the victim stays cached and dirty and the error is returned.
    fn allocate_frame<W>(&self, state: &mut PoolState, write_back: W) -> Result<FrameId>
    where
        W: FnOnce(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frame(fid).pin_count() == 0)
            .ok_or(KeelError::BufferPoolFull)?;

        let frame = self.frame(victim_id);
        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                write_back(old_page_id, &**frame.read_data())?;
                frame.clear_dirty();
            }
            state.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    /// Inserts a new, zeroed page into the buffer pool and pins it.
    ///
    /// If the page already exists, returns the existing frame. `write_back`
    /// receives the dirty page evicted to make room, if any.
    pub fn new_page<W>(&self, page_id: PageId, write_back: W) -> Result<Arc<BufferFrame>>
    where
        W: FnOnce(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        self.claim_page(page_id, None, write_back)
    }

    /// Loads page data read from disk into the buffer pool and pins it.
    ///
    /// A page that is already resident keeps its in-memory contents and
    /// `data` is ignored. `write_back` receives the dirty page evicted to
    /// make room, if any.
    pub fn load_page<W>(
        &self,
        page_id: PageId,
        data: &[u8],
        write_back: W,
    ) -> Result<Arc<BufferFrame>>
    where
        W: FnOnce(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        self.claim_page(page_id, Some(data), write_back)
    }

    fn claim_page<W>(
        &self,
        page_id: PageId,
        data: Option<&[u8]>,
        write_back: W,
    ) -> Result<Arc<BufferFrame>>
    where
        W: FnOnce(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = self.frame(frame_id);
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.allocate_frame(&mut state, write_back)?;

        // Filled under the state lock so no other caller sees a half-loaded page
        let frame = self.frame(frame_id);
        frame.assign(page_id, data);
        frame.pin();
        self.replacer.record_access(frame_id);
        state.page_table.insert(page_id, frame_id);

        Ok(Arc::clone(frame))
    }

    /// Unpins a page in the buffer pool.
    ///
    /// A true `is_dirty` marks the page for write-back; false leaves any
    /// earlier dirty mark in place. Fails with `PageNotPinned` if the page
    /// is not resident or its pin count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let not_pinned = KeelError::PageNotPinned {
            page_id: page_id.as_u64(),
        };
        // Held so the frame cannot be evicted between the dirty mark and the unpin
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Err(not_pinned);
        };
        self.frame(frame_id).release(is_dirty).ok_or(not_pinned)?;
        Ok(())
    }

    /// Flushes a page to the provided callback.
    ///
    /// The callback receives the page data if the page is dirty.
    /// Returns true if the page was flushed.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let frame = match self.state.lock().page_table.get(&page_id) {
            Some(&frame_id) => Arc::clone(self.frame(frame_id)),
            None => return Ok(false),
        };

        if !frame.is_dirty() {
            return Ok(false);
        }
        let data = frame.read_data();
        flush_fn(page_id, &**data)?;
        frame.clear_dirty();
        Ok(true)
    }

    /// Flushes every dirty page belonging to one file.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_file<F>(&self, file_id: u32, flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        self.flush_matching(|page_id| page_id.file_id == file_id, flush_fn)
    }

    /// Flushes all dirty pages.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&self, flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        self.flush_matching(|_| true, flush_fn)
    }

    fn flush_matching<P, F>(&self, predicate: P, mut flush_fn: F) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        // Collect first so the callback runs without the state lock held
        let mut dirty_pages: Vec<(PageId, Arc<BufferFrame>)> = {
            let state = self.state.lock();
            state
                .page_table
                .iter()
                .filter(|(page_id, _)| predicate(**page_id))
                .map(|(page_id, frame_id)| (*page_id, Arc::clone(self.frame(*frame_id))))
                .filter(|(_, frame)| frame.is_dirty())
                .collect()
        };
        dirty_pages.sort_by_key(|(page_id, _)| page_id.as_u64());

        let mut flushed = 0;
        for (page_id, frame) in dirty_pages {
            let data = frame.read_data();
            flush_fn(page_id, &**data)?;
            frame.clear_dirty();
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame_id in state.page_table.values() {
            let frame = self.frame(*frame_id);
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: state.free_list.len(),
            used_frames: state.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
