//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Trait for page replacement algorithms.
///
/// The replacer only ranks frames. Whether a frame may be evicted (its pin
/// count) is owned by the pool and supplied through the `can_evict` callback.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame among those for which `can_evict` returns true.
    ///
    /// Returns None if no frame is evictable.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;
}

/// Clock replacement algorithm implementation.
///
/// The clock algorithm walks a circular buffer of reference bits:
/// 1. Skip frames that cannot be evicted
/// 2. If the reference bit is set, clear it and advance
/// 3. Otherwise select the frame as victim
///
/// Two full rotations are always enough to find a victim when one exists.
pub struct ClockReplacer {
    inner: Mutex<ClockReplacerInner>,
}

struct ClockReplacerInner {
    reference_bits: Vec<bool>,
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(ClockReplacerInner {
                reference_bits: vec![false; num_frames],
                clock_hand: 0,
            }),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().reference_bits.len()
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(bit) = inner.reference_bits.get_mut(frame_id.as_usize()) {
            *bit = true;
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let num_frames = inner.reference_bits.len();
        if num_frames == 0 {
            return None;
        }

        for _ in 0..(2 * num_frames) {
            let hand = inner.clock_hand;
            inner.clock_hand = (hand + 1) % num_frames;

            let frame_id = FrameId(hand as u32);
            if !can_evict(frame_id) {
                continue;
            }
            if inner.reference_bits[hand] {
                inner.reference_bits[hand] = false;
                continue;
            }
            return Some(frame_id);
        }

        None
    }
}
