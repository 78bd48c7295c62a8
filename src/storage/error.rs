//! Storage layer error types.
//!
//! Every failure of the store, its checkouts and its columns is reported
//! through [`StorageError`]. Upper layers pass these through unchanged unless
//! they have context to add.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::DType;

/// The main error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error from the underlying git library.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Filesystem level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of metadata or column specs failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No store exists at the given path.
    #[error("store not initialized: {0}")]
    NotInitialized(PathBuf),

    /// Another write checkout holds the writer lock.
    #[error("writer lock is held by {}", .holder.as_deref().unwrap_or("an unknown writer"))]
    LockHeld { holder: Option<String> },

    /// A lease was used after the lock changed hands (e.g. force release).
    #[error("writer lease {0} no longer owns the writer lock")]
    LeaseMismatch(String),

    /// Mutation attempted on a read checkout.
    #[error("checkout is read-only")]
    ReadOnly,

    /// The checkout was already closed.
    #[error("checkout is closed")]
    Closed,

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("sample not found: column={column}, key={key}")]
    SampleNotFound { column: String, key: String },

    /// `create_if_absent` found an existing column with another spec.
    #[error("column {column} already exists with a different spec")]
    ColumnSpecMismatch { column: String },

    #[error("dtype mismatch in column {column}: expected {expected}, found {found}")]
    DTypeMismatch {
        column: String,
        expected: DType,
        found: DType,
    },

    #[error("shape mismatch in column {column}: {reason}")]
    ShapeMismatch { column: String, reason: String },

    /// Flat access on a nested column or the other way round.
    #[error("column {column} is not a {expected} column")]
    WrongLayout {
        column: String,
        expected: &'static str,
    },

    #[error("invalid array: {0}")]
    InvalidArray(String),

    /// Data integrity check failed while decoding stored content.
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// A ref moved while this process held the writer lock.
    #[error("concurrent modification: {0} moved underneath the writer")]
    ConcurrentModification(String),

    /// The store refused the commit.
    #[error("commit rejected by store: {0}")]
    CommitRejected(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Check if this error indicates the resource doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ColumnNotFound(_)
                | StorageError::SampleNotFound { .. }
                | StorageError::CommitNotFound(_)
        )
    }

    /// Check if this error means another writer is active.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, StorageError::LockHeld { .. })
    }

    /// Check if this error signals damaged stored data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageError::CorruptedData { .. })
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
