//! Heap file storage for keel.
//!
//! This crate provides:
//! - Disk manager for named files and page-level I/O
//! - Buffer manager seam over the keel-buffer page cache
//! - Slotted data pages chained into heap files
//! - Filtered scans and append-only inserts over heap files

mod buffer;
mod disk;
mod heap;
mod record;

pub use buffer::{BufferManager, DiskBufferManager};
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::constants::{DATA_PAGE_HEADER_SIZE, MAX_NAME_SIZE, MAX_RECORD_LEN, SLOT_SIZE};
pub use heap::{
    DataPage, Datatype, HeapFile, HeapFileHeader, HeapScan, InsertScan, Operator, ScanPredicate,
    SlotId, create_heap_file, destroy_heap_file,
};
pub use record::{Record, RecordId};
