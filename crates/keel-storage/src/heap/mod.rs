//! Heap file storage.
//!
//! This module provides unordered record storage with:
//! - DataPage: Slotted page format for variable-length records
//! - HeapFile: Open file state holding the header and one current page pinned
//! - HeapScan: Filtered sequential scan with mark/reset and delete
//! - InsertScan: Appends that grow the page chain on overflow

pub mod constants;
mod file;
mod header;
mod insert;
mod page;
mod predicate;
mod scan;

pub use file::{HeapFile, create_heap_file, destroy_heap_file};
pub use header::HeapFileHeader;
pub use insert::InsertScan;
pub use page::{DataPage, SlotId};
pub use predicate::{Datatype, Operator, ScanPredicate};
pub use scan::HeapScan;
