//! Error types for Krait.

use crate::page::{PageId, RecordId};
use thiserror::Error;

/// Result type alias using KraitError.
pub type Result<T> = std::result::Result<T, KraitError>;

/// Errors that can occur in Krait operations.
#[derive(Debug, Error)]
pub enum KraitError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Buffer pool errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page not pinned: {page_id}")]
    PageNotPinned { page_id: PageId },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Heap file errors
    #[error("Record size mismatch: expected {expected}, got {actual}")]
    BadRecordSize { expected: usize, actual: usize },

    #[error("Not a heap file: {0}")]
    BadHeapFile(String),

    #[error("Record not found: {rid}")]
    RecordNotFound { rid: RecordId },

    #[error("End of file")]
    EndOfFile,

    // Index errors
    #[error("Index metadata does not match: {0}")]
    BadIndexMeta(String),

    #[error("Key type mismatch: index holds {expected}, got {actual}")]
    KeyTypeMismatch { expected: String, actual: String },

    // Scan protocol errors
    #[error("Unsupported scan operators")]
    BadOpcodes,

    #[error("Scan range low bound exceeds high bound")]
    BadScanRange,

    #[error("No scan in progress")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    #[error("Key not found")]
    NoSuchKeyFound,
}
