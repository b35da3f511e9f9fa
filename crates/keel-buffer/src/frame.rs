//! Page frames and their pin/dirty bookkeeping.

use keel_common::page::{PAGE_SIZE, PageId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Packed page id stored by an unassigned frame.
const UNASSIGNED: u64 = u64::MAX;

/// Index of a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// One page-sized slot of the buffer pool.
///
/// A frame handed out by the pool stays bound to its page until every pin
/// on it has been released. Writing through [`BufferFrame::write_data`] does
/// not mark the frame dirty: the holder reports the modification when it
/// releases its pin, and a dirty mark sticks until the page is written back.
pub struct BufferFrame {
    id: FrameId,
    page: AtomicU64,
    pins: AtomicU32,
    dirty: AtomicBool,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl BufferFrame {
    /// Creates an unassigned, zeroed frame.
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            page: AtomicU64::new(UNASSIGNED),
            pins: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    #[inline]
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Returns the page held by this frame, if any.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        match self.page.load(Ordering::Acquire) {
            UNASSIGNED => None,
            packed => Some(PageId::from_u64(packed)),
        }
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Adds a pin and returns the previous pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pins.fetch_add(1, Ordering::AcqRel)
    }

    /// Drops one pin, marking the frame dirty first when `dirty` is set.
    ///
    /// Returns the previous pin count, or None without touching the dirty
    /// flag if the frame was not pinned.
    pub fn release(&self, dirty: bool) -> Option<u32> {
        if !self.is_pinned() {
            return None;
        }
        if dirty {
            self.dirty.store(true, Ordering::Release);
        }
        self.pins
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
    }

    /// Clears the dirty mark once the contents have been written back.
    #[inline]
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Binds the frame to a page, loading `contents` or zeroing it.
    ///
    /// The frame comes out unpinned and clean.
    pub fn assign(&self, page_id: PageId, contents: Option<&[u8]>) {
        {
            let mut data = self.data.write();
            data.fill(0);
            if let Some(contents) = contents {
                let len = contents.len().min(PAGE_SIZE);
                data[..len].copy_from_slice(&contents[..len]);
            }
        }
        self.pins.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.page.store(page_id.as_u64(), Ordering::Release);
    }

    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }
}

impl fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferFrame")
            .field("id", &self.id)
            .field("page_id", &self.page_id())
            .field("pins", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_display() {
        assert_eq!(FrameId(42).to_string(), "frame:42");
        assert_eq!(FrameId(3).as_usize(), 3);
    }

    #[test]
    fn test_new_frame_is_unassigned() {
        let frame = BufferFrame::new(FrameId(0));

        assert_eq!(frame.id(), FrameId(0));
        assert!(frame.page_id().is_none());
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_pin_and_release() {
        let frame = BufferFrame::new(FrameId(0));

        assert_eq!(frame.pin(), 0);
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.release(false), Some(2));
        assert!(frame.is_pinned());
        assert_eq!(frame.release(false), Some(1));
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_release_unpinned_frame() {
        let frame = BufferFrame::new(FrameId(0));

        assert_eq!(frame.release(true), None);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_dirty_mark_is_sticky() {
        let frame = BufferFrame::new(FrameId(0));
        frame.pin();
        frame.pin();

        frame.release(true);
        frame.release(false);
        assert!(frame.is_dirty());

        frame.clear_dirty();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_write_does_not_mark_dirty() {
        let frame = BufferFrame::new(FrameId(0));

        frame.write_data()[PAGE_SIZE - 1] = 0xCD;
        assert_eq!(frame.read_data()[PAGE_SIZE - 1], 0xCD);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_assign_loads_contents() {
        let frame = BufferFrame::new(FrameId(1));
        frame.write_data()[100] = 0xEE;
        frame.pin();
        frame.release(true);

        let page_id = PageId::new(2, 7);
        frame.assign(page_id, Some(&[0xAB; 16]));

        assert_eq!(frame.page_id(), Some(page_id));
        assert!(!frame.is_dirty());
        assert_eq!(frame.read_data()[15], 0xAB);
        assert_eq!(frame.read_data()[16], 0);
        assert_eq!(frame.read_data()[100], 0);

        frame.assign(page_id, None);
        assert_eq!(frame.read_data()[0], 0);
    }

    #[test]
    fn test_assign_rebinds_page() {
        let frame = BufferFrame::new(FrameId(0));
        frame.assign(PageId::new(1, 1), Some(&[0x11; 4]));
        frame.assign(PageId::new(1, 2), None);

        assert_eq!(frame.page_id(), Some(PageId::new(1, 2)));
        assert_eq!(frame.read_data()[3], 0);
    }

    #[test]
    fn test_frame_debug() {
        let frame = BufferFrame::new(FrameId(5));
        frame.assign(PageId::new(1, 10), None);
        frame.pin();

        let debug_str = format!("{:?}", frame);
        assert!(debug_str.contains("BufferFrame"));
        assert!(debug_str.contains("pins: 1"));
    }
}
