//! Error types for keel.

use thiserror::Error;

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;

/// Errors that can occur in keel operations.
#[derive(Debug, Error)]
pub enum KeelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File layer errors
    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File not open: {file_id}")]
    FileNotOpen { file_id: u32 },

    #[error("File is open: {0}")]
    FileOpen(String),

    #[error("Open of heap file {name} failed: {reason}")]
    OpenFailed { name: String, reason: String },

    // Buffer pool errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Page not pinned: {page_id}")]
    PageNotPinned { page_id: u64 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u64, reason: String },

    // Page and record errors
    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("No current record under the scan cursor")]
    NoCurrentRecord,

    #[error("Invalid record length: {len} bytes (max {max})")]
    InvalidRecordLength { len: usize, max: usize },

    // Scan errors
    #[error("Bad scan parameter: {0}")]
    BadScanParameter(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let keel_err: KeelError = io_err.into();
        assert!(matches!(keel_err, KeelError::Io(_)));
        assert!(keel_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_file_errors_display() {
        let err = KeelError::FileExists("t1".to_string());
        assert_eq!(err.to_string(), "File already exists: t1");

        let err = KeelError::FileNotFound("t2".to_string());
        assert_eq!(err.to_string(), "File not found: t2");

        let err = KeelError::FileNotOpen { file_id: 7 };
        assert_eq!(err.to_string(), "File not open: 7");

        let err = KeelError::OpenFailed {
            name: "t3".to_string(),
            reason: "File not found: t3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Open of heap file t3 failed: File not found: t3"
        );
    }

    #[test]
    fn test_buffer_errors_display() {
        let err = KeelError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");

        let err = KeelError::PageNotPinned { page_id: 9 };
        assert_eq!(err.to_string(), "Page not pinned: 9");

        let err = KeelError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_page_corrupted_display() {
        let err = KeelError::PageCorrupted {
            page_id: 100,
            reason: "not a header page".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Page corrupted: 100, reason: not a header page"
        );
    }

    #[test]
    fn test_record_errors_display() {
        let err = KeelError::InvalidRecordLength {
            len: 20000,
            max: 16364,
        };
        assert_eq!(
            err.to_string(),
            "Invalid record length: 20000 bytes (max 16364)"
        );

        let err = KeelError::RecordNotFound("3:1".to_string());
        assert_eq!(err.to_string(), "Record not found: 3:1");

        let err = KeelError::BadScanParameter("length must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Bad scan parameter: length must be at least 1"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(KeelError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KeelError>();
    }
}
