//! Session error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::{CheckoutMode, StorageError};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while acquiring, sharing or committing sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No `head.stock` at the root: the stock was never initialized.
    #[error("stock not initialized at {}", .0.display())]
    NotInitialized(PathBuf),

    /// Filesystem failure on the head pointer.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another write session is open, in this process or another one.
    #[error(
        "a write session is already open on {} (held by {}); close it or run `stock liberate`",
        .root.display(),
        .holder.as_deref().unwrap_or("an unknown writer")
    )]
    LockHeld {
        root: PathBuf,
        holder: Option<String>,
    },

    /// An optimized session of this mode is already open for the root.
    #[error("an optimized {mode} session is already open")]
    Reentrancy { mode: CheckoutMode },

    /// The head pointer and the store disagree on the latest commit.
    #[error("head pointer is at {pointer} but the store head is {store}")]
    StaleHead { pointer: String, store: String },
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error means another writer is active.
    pub fn is_lock_held(&self) -> bool {
        match self {
            SessionError::LockHeld { .. } => true,
            SessionError::Storage(e) => e.is_lock_held(),
            _ => false,
        }
    }

    /// Check if this error indicates the resource doesn't exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            SessionError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}
