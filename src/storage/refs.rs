//!  Reference management for the git store.
//!
//!  Git refs are pointers to commits. The store uses two:
//! - `refs/heads/main`: the committed history, moved only by `commit`
//! - `refs/stockroom/staging`: a detached commit holding the writer's staging area
//!
//! main is updated with compare-and-swap semantics so that a writer whose
//! lock was force-released cannot silently overwrite a newer commit.

use git2::{ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::CommitId;

pub(crate) const MAIN_REF: &str = "refs/heads/main";
pub(crate) const STAGING_REF: &str = "refs/stockroom/staging";

/// Manages Git references.
pub(crate) struct RefManager;

impl RefManager {
    /// Resolve a ref to its commit, `None` if the ref doesn't exist yet.
    pub fn resolve(repo: &Repository, refname: &str) -> StorageResult<Option<CommitId>> {
        match repo.find_reference(refname) {
            Ok(reference) => {
                let commit = reference.peel_to_commit()?;
                Ok(Some(CommitId::new(commit.id())))
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(StorageError::Git(e)),
        }
    }

    /// Latest commit on main, `None` for an empty store.
    pub fn main_head(repo: &Repository) -> StorageResult<Option<CommitId>> {
        Self::resolve(repo, MAIN_REF)
    }

    pub fn staging(repo: &Repository) -> StorageResult<Option<CommitId>> {
        Self::resolve(repo, STAGING_REF)
    }

    /// Point `refname` at `target`, creating or overwriting it.
    pub fn set(
        repo: &Repository,
        refname: &str,
        target: CommitId,
        log_message: &str,
    ) -> StorageResult<()> {
        repo.reference(refname, target.raw(), true, log_message)?;
        Ok(())
    }

    /// Move main to `new_target` only if it still points to `expected`.
    ///
    /// Returns `ConcurrentModification` if main moved in the meantime.
    pub fn update_main_if_unchanged(
        repo: &Repository,
        expected: Option<CommitId>,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::main_head(repo)?;
        if current != expected {
            return Err(StorageError::ConcurrentModification(MAIN_REF.to_string()));
        }

        let log_message = format!("commit {}", new_target);
        match expected {
            Some(old) => {
                repo.reference_matching(MAIN_REF, new_target.raw(), true, old.raw(), &log_message)
                    .map_err(|e| match e.code() {
                        ErrorCode::Modified | ErrorCode::Exists => {
                            StorageError::ConcurrentModification(MAIN_REF.to_string())
                        }
                        _ => StorageError::Git(e),
                    })?;
            }
            None => {
                repo.reference(MAIN_REF, new_target.raw(), false, &log_message)
                    .map_err(|e| match e.code() {
                        ErrorCode::Exists => {
                            StorageError::ConcurrentModification(MAIN_REF.to_string())
                        }
                        _ => StorageError::Git(e),
                    })?;
            }
        }
        Ok(())
    }

    /// Make HEAD a symbolic ref to main (unborn until the first commit).
    pub fn init_head(repo: &Repository) -> StorageResult<()> {
        repo.set_head(MAIN_REF)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::CommitBuilder;
    use crate::storage::snapshot::Snapshot;
    use crate::storage::tree::write_snapshot;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        RefManager::init_head(&repo).unwrap();
        (dir, repo)
    }

    fn make_commit(repo: &Repository, parent: Option<CommitId>) -> CommitId {
        let tree_id = write_snapshot(repo, &Snapshot::new()).unwrap();
        CommitBuilder::new(repo, tree_id)
            .on_top_of(parent)
            .write("test")
            .unwrap()
    }

    #[test]
    fn test_empty_store_has_no_head() {
        let (_dir, repo) = setup_repo();
        assert_eq!(RefManager::main_head(&repo).unwrap(), None);
        assert_eq!(RefManager::staging(&repo).unwrap(), None);
    }

    #[test]
    fn test_update_main_if_unchanged() {
        let (_dir, repo) = setup_repo();
        let first = make_commit(&repo, None);
        RefManager::update_main_if_unchanged(&repo, None, first).unwrap();
        assert_eq!(RefManager::main_head(&repo).unwrap(), Some(first));

        let second = make_commit(&repo, Some(first));
        RefManager::update_main_if_unchanged(&repo, Some(first), second).unwrap();
        assert_eq!(RefManager::main_head(&repo).unwrap(), Some(second));

        // stale expectation is rejected
        let third = make_commit(&repo, Some(second));
        let result = RefManager::update_main_if_unchanged(&repo, Some(first), third);
        assert!(matches!(result, Err(StorageError::ConcurrentModification(_))));
        let result = RefManager::update_main_if_unchanged(&repo, None, third);
        assert!(matches!(result, Err(StorageError::ConcurrentModification(_))));
    }

    #[test]
    fn test_staging_ref() {
        let (_dir, repo) = setup_repo();
        let commit = make_commit(&repo, None);
        RefManager::set(&repo, STAGING_REF, commit, "stage").unwrap();
        assert_eq!(RefManager::staging(&repo).unwrap(), Some(commit));
        // staging never moves main
        assert_eq!(RefManager::main_head(&repo).unwrap(), None);
    }
}
