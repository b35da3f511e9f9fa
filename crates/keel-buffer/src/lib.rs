//! Buffer pool management for keel.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock eviction policy over unpinned frames
//! - Pin counting with dirty flags reported at unpin time
//! - Dirty victims written back through a caller callback before reuse

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats};
pub use replacer::{ClockReplacer, Replacer};
