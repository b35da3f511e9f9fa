//! keel common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all keel components.

pub mod config;
pub mod error;
pub mod page;

pub use config::StorageConfig;
pub use error::{KeelError, Result};
pub use page::{INVALID_PAGE, PAGE_SIZE, PageId, PageType};
