//! In-memory store.
//!
//! Same contract as the git store, nothing on disk. Handy for tests and for
//! short-lived stocks. Clones share state, so several session managers can
//! point at one store the way several handles point at one `.stock` directory.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use ulid::Ulid;

use crate::storage::commit::CommitInfo;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::snapshot::Snapshot;
use crate::storage::store::{VersionedStore, WriterLease};
use crate::storage::types::{Digest, GitSignature};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    commits: Vec<MemoryCommit>,
    staging: Option<Snapshot>,
    writer: Option<WriterLease>,
    reject_next_commit: Option<String>,
}

struct MemoryCommit {
    info: CommitInfo,
    snapshot: Snapshot,
}

impl MemoryState {
    fn head(&self) -> Option<&MemoryCommit> {
        self.commits.last()
    }

    fn ensure_lease(&self, lease: &WriterLease) -> StorageResult<()> {
        if self.writer.as_ref() != Some(lease) {
            return Err(StorageError::LeaseMismatch(lease.token().to_string()));
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with `CommitRejected`.
    pub fn reject_next_commit(&self, reason: impl Into<String>) {
        self.inner.lock().reject_next_commit = Some(reason.into());
    }

    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits.len()
    }
}

impl VersionedStore for MemoryStore {
    fn head(&self) -> StorageResult<Option<Digest>> {
        Ok(self.inner.lock().head().map(|c| c.info.digest.clone()))
    }

    fn snapshot_at(&self, digest: &Digest) -> StorageResult<Snapshot> {
        self.inner
            .lock()
            .commits
            .iter()
            .find(|c| &c.info.digest == digest)
            .map(|c| c.snapshot.clone())
            .ok_or_else(|| StorageError::CommitNotFound(digest.to_string()))
    }

    fn acquire_writer(&self) -> StorageResult<WriterLease> {
        let mut state = self.inner.lock();
        if let Some(current) = &state.writer {
            return Err(StorageError::LockHeld {
                holder: Some(current.holder()),
            });
        }
        let lease = WriterLease::new();
        state.writer = Some(lease.clone());
        Ok(lease)
    }

    fn release_writer(&self, lease: &WriterLease) -> StorageResult<()> {
        let mut state = self.inner.lock();
        state.ensure_lease(lease)?;
        state.writer = None;
        Ok(())
    }

    fn load_staging(&self, lease: &WriterLease) -> StorageResult<Snapshot> {
        let state = self.inner.lock();
        state.ensure_lease(lease)?;
        Ok(match (&state.staging, state.head()) {
            (Some(staging), _) => staging.clone(),
            (None, Some(head)) => head.snapshot.clone(),
            (None, None) => Snapshot::new(),
        })
    }

    fn save_staging(&self, lease: &WriterLease, snapshot: &Snapshot) -> StorageResult<()> {
        let mut state = self.inner.lock();
        state.ensure_lease(lease)?;
        state.staging = Some(snapshot.clone());
        Ok(())
    }

    fn commit(
        &self,
        lease: &WriterLease,
        snapshot: &Snapshot,
        message: &str,
    ) -> StorageResult<Digest> {
        let mut state = self.inner.lock();
        state.ensure_lease(lease)?;
        if let Some(reason) = state.reject_next_commit.take() {
            return Err(StorageError::CommitRejected(reason));
        }

        let digest = Digest::new(Ulid::new().to_string().to_lowercase())?;
        let signature = GitSignature::stockroom();
        let info = CommitInfo {
            digest: digest.clone(),
            parents: state.head().map(|c| c.info.digest.clone()).into_iter().collect(),
            message: message.to_string(),
            author_name: signature.name,
            author_email: signature.email,
            timestamp: Utc::now(),
        };
        state.commits.push(MemoryCommit {
            info,
            snapshot: snapshot.clone(),
        });
        state.staging = Some(snapshot.clone());
        Ok(digest)
    }

    fn log(&self) -> StorageResult<Vec<CommitInfo>> {
        Ok(self
            .inner
            .lock()
            .commits
            .iter()
            .rev()
            .map(|c| c.info.clone())
            .collect())
    }

    fn writer_lock_held(&self) -> StorageResult<bool> {
        Ok(self.inner.lock().writer.is_some())
    }

    fn force_release_writer_lock(&self) -> StorageResult<bool> {
        Ok(self.inner.lock().writer.take().is_some())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("commits", &self.commit_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_order_and_parents() {
        let store = MemoryStore::new();
        let lease = store.acquire_writer().unwrap();
        let m1 = store.commit(&lease, &Snapshot::new(), "m1").unwrap();
        let m2 = store.commit(&lease, &Snapshot::new(), "m2").unwrap();

        assert_ne!(m1, m2);
        assert_eq!(store.head().unwrap(), Some(m2.clone()));
        let log = store.log().unwrap();
        assert_eq!(log[0].digest, m2);
        assert_eq!(log[0].parents, vec![m1.clone()]);
        assert_eq!(log[1].digest, m1);
        assert!(log[1].parents.is_empty());
    }

    #[test]
    fn test_rejected_commit_leaves_head() {
        let store = MemoryStore::new();
        let lease = store.acquire_writer().unwrap();
        let m1 = store.commit(&lease, &Snapshot::new(), "m1").unwrap();

        store.reject_next_commit("disk full");
        let result = store.commit(&lease, &Snapshot::new(), "m2");
        assert!(matches!(result, Err(StorageError::CommitRejected(_))));
        assert_eq!(store.head().unwrap(), Some(m1));
        assert_eq!(store.commit_count(), 1);

        // only the next commit is rejected
        store.commit(&lease, &Snapshot::new(), "m2").unwrap();
    }

    #[test]
    fn test_clones_share_the_lock() {
        let store = MemoryStore::new();
        let other = store.clone();
        let lease = store.acquire_writer().unwrap();
        assert!(other.acquire_writer().unwrap_err().is_lock_held());
        other.release_writer(&lease).unwrap();
        assert!(!store.writer_lock_held().unwrap());
    }
}
