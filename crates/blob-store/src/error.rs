//! Error types for the blob store.

use crate::store::FileId;

/// Errors that can occur when working with the blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    /// Rejected before any state was touched
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The byte source failed while hashing or copying
    #[error("failed to read source: {0}")]
    Read(#[source] std::io::Error),

    /// Writing the blob to its final path failed after the row was reserved
    #[error("failed to write blob: {0}")]
    StorageWrite(#[source] std::io::Error),

    /// The content-derived path is already taken
    #[error("content already stored at {0}")]
    DuplicateContent(String),

    /// No record with this identifier
    #[error("file not found: {0}")]
    NotFound(FileId),

    /// Staging buffer creation or release failed
    #[error("staging resource error: {0}")]
    Resource(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored row does not satisfy the record invariants
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for blob store operations.
pub type Result<T> = std::result::Result<T, BlobStoreError>;
