//!   The git-backed store.
//!
//!  This is the durable [`VersionedStore`]. It wraps a bare `git2::Repository`
//!  (the `.stock` directory of a stock root) with thread-safe access:
//!
//! - committed history lives on `refs/heads/main`
//! - the writer's staging area is a detached commit on `refs/stockroom/staging`
//! - the single-writer guarantee comes from a lock file next to the objects,
//!   so it holds across handles and processes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::commit::{self, CommitBuilder, CommitInfo, CommitMessage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::lock::WriterLock;
use crate::storage::refs::{RefManager, STAGING_REF};
use crate::storage::snapshot::Snapshot;
use crate::storage::store::{VersionedStore, WriterLease};
use crate::storage::tree;
use crate::storage::types::{CommitId, Digest, GitSignature};

/// The git store.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitStore {
    inner: Arc<GitStoreInner>,
}

struct GitStoreInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
    lock: WriterLock,
}

impl GitStore {
    /// Initialize a new store at `path` (a bare repository).
    ///
    /// `signature` is written to the repository config and used for commits.
    pub fn init(path: impl AsRef<Path>, signature: Option<&GitSignature>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init_bare(path)?;
        RefManager::init_head(&repo)?;

        if let Some(signature) = signature {
            let mut config = repo.config()?;
            config.set_str("user.name", &signature.name)?;
            config.set_str("user.email", &signature.email)?;
        }
        info!(path = %path.display(), "initialized store");

        Self::from_repo(repo, path)
    }

    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open_bare(path)
            .map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Self::from_repo(repo, path)
    }

    /// Whether a store exists at `path`.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        Repository::open_bare(path.as_ref()).is_ok()
    }

    fn from_repo(repo: Repository, path: &Path) -> StorageResult<Self> {
        let signature = Self::configured_signature(&repo);
        let lock = WriterLock::new(repo.path());

        Ok(Self {
            inner: Arc::new(GitStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
                lock,
            }),
        })
    }

    /// `user.name`/`user.email` from the git config, falling back to the
    /// stockroom default.
    fn configured_signature(repo: &Repository) -> GitSignature {
        repo.config()
            .ok()
            .and_then(|config| {
                let name = config.get_string("user.name").ok()?;
                let email = config.get_string("user.email").ok()?;
                Some(GitSignature::new(name, email))
            })
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn signature(&self) -> &GitSignature {
        &self.inner.signature
    }

    /// Execute a function with exclusive access to the repository.
    fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    fn ensure_lease(&self, lease: &WriterLease) -> StorageResult<()> {
        if !self.inner.lock.owns(lease) {
            return Err(StorageError::LeaseMismatch(lease.token().to_string()));
        }
        Ok(())
    }

    fn read_commit(repo: &Repository, id: CommitId) -> StorageResult<Snapshot> {
        let commit = repo
            .find_commit(id.raw())
            .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;
        let tree = commit.tree()?;
        tree::read_snapshot(repo, &tree)
    }
}

impl VersionedStore for GitStore {
    fn head(&self) -> StorageResult<Option<Digest>> {
        self.with_repo(|repo| Ok(RefManager::main_head(repo)?.map(CommitId::to_digest)))
    }

    fn snapshot_at(&self, digest: &Digest) -> StorageResult<Snapshot> {
        let id = CommitId::from_digest(digest)?;
        self.with_repo(|repo| Self::read_commit(repo, id))
    }

    fn acquire_writer(&self) -> StorageResult<WriterLease> {
        self.inner.lock.acquire()
    }

    fn release_writer(&self, lease: &WriterLease) -> StorageResult<()> {
        self.inner.lock.release(lease)
    }

    fn load_staging(&self, lease: &WriterLease) -> StorageResult<Snapshot> {
        self.ensure_lease(lease)?;
        self.with_repo(|repo| {
            let tip = match RefManager::staging(repo)? {
                Some(staging) => Some(staging),
                None => RefManager::main_head(repo)?,
            };
            match tip {
                Some(id) => Self::read_commit(repo, id),
                None => Ok(Snapshot::new()),
            }
        })
    }

    fn save_staging(&self, lease: &WriterLease, snapshot: &Snapshot) -> StorageResult<()> {
        self.ensure_lease(lease)?;
        self.with_repo(|repo| {
            let tree_id = tree::write_snapshot(repo, snapshot)?;
            let id = CommitBuilder::new(repo, tree_id)
                .on_top_of(RefManager::main_head(repo)?)
                .authored_by(&self.inner.signature)
                .write(CommitMessage::STAGING)?;
            RefManager::set(repo, STAGING_REF, id, "stage")?;
            debug!(staging = %id, "saved staging");
            Ok(())
        })
    }

    fn commit(
        &self,
        lease: &WriterLease,
        snapshot: &Snapshot,
        message: &str,
    ) -> StorageResult<Digest> {
        self.ensure_lease(lease)?;
        self.with_repo(|repo| {
            let parent = RefManager::main_head(repo)?;
            let tree_id = tree::write_snapshot(repo, snapshot)?;
            let id = CommitBuilder::new(repo, tree_id)
                .on_top_of(parent)
                .authored_by(&self.inner.signature)
                .write(&CommitMessage::user(message))?;

            RefManager::update_main_if_unchanged(repo, parent, id)?;
            RefManager::set(repo, STAGING_REF, id, "reset staging after commit")?;
            Ok(id.to_digest())
        })
    }

    fn log(&self) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| match RefManager::main_head(repo)? {
            Some(head) => commit::history(repo, head),
            None => Ok(Vec::new()),
        })
    }

    fn writer_lock_held(&self) -> StorageResult<bool> {
        Ok(self.inner.lock.is_held())
    }

    fn force_release_writer_lock(&self) -> StorageResult<bool> {
        self.inner.lock.force_release()
    }
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore").field("path", &self.inner.path).finish()
    }
}
