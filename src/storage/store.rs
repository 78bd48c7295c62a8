//! The interface every store backend implements.
//!
//! The session layer never talks to a backend directly; it goes through
//! [`Checkout`](crate::storage::Checkout), which drives these calls in the
//! right order (lock, load staging, save staging, commit, release).

use ulid::Ulid;

use crate::storage::commit::CommitInfo;
use crate::storage::error::StorageResult;
use crate::storage::snapshot::Snapshot;
use crate::storage::types::Digest;

/// Proof of holding the store's writer lock.
///
/// Every staging or commit call must present the lease it got from
/// [`VersionedStore::acquire_writer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterLease {
    token: String,
    pid: u32,
}

impl WriterLease {
    pub(crate) fn new() -> Self {
        Self {
            token: Ulid::new().to_string().to_lowercase(),
            pid: std::process::id(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Identification written into lock files and error messages.
    pub fn holder(&self) -> String {
        format!("{} pid={}", self.token, self.pid)
    }
}

/// A versioned store: commits, a mutable staging area and a single-writer
/// lock shared by every handle (and, for durable backends, every process).
pub trait VersionedStore: Send + Sync {
    /// Digest of the latest commit, `None` before the first one.
    fn head(&self) -> StorageResult<Option<Digest>>;

    /// Content of a committed snapshot.
    fn snapshot_at(&self, digest: &Digest) -> StorageResult<Snapshot>;

    /// Take the writer lock. Fails fast with `LockHeld`, never waits.
    fn acquire_writer(&self) -> StorageResult<WriterLease>;

    fn release_writer(&self, lease: &WriterLease) -> StorageResult<()>;

    /// Current staging area (the last committed snapshot if nothing is staged).
    fn load_staging(&self, lease: &WriterLease) -> StorageResult<Snapshot>;

    fn save_staging(&self, lease: &WriterLease, snapshot: &Snapshot) -> StorageResult<()>;

    /// Record `snapshot` as a new commit on top of the head and return its digest.
    fn commit(
        &self,
        lease: &WriterLease,
        snapshot: &Snapshot,
        message: &str,
    ) -> StorageResult<Digest>;

    /// Commit history, most recent first.
    fn log(&self) -> StorageResult<Vec<CommitInfo>>;

    fn writer_lock_held(&self) -> StorageResult<bool>;

    /// Drop the writer lock regardless of who holds it. Returns whether a
    /// lock was present.
    fn force_release_writer_lock(&self) -> StorageResult<bool>;
}
