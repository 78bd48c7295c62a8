//!  Commits of the git store.
//!
//!  Two kinds of commits are written:
//! - user commits on `refs/heads/main`, one per `Checkout::commit`
//! - detached staging commits under `refs/stockroom/staging`, whose parent
//!   is the main head they were staged against
//!
//! Neither kind moves a ref here; `refs` does that once the commit exists.

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, Digest, GitSignature, TreeId};

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub digest: Digest,
    pub parents: Vec<Digest>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let timestamp = Utc
            .timestamp_opt(author.when().seconds(), 0)
            .single()
            .unwrap_or_default();

        Self {
            digest: CommitId::new(commit.id()).to_digest(),
            parents: commit
                .parent_ids()
                .map(|id| CommitId::new(id).to_digest())
                .collect(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author_name: String::from_utf8_lossy(author.name_bytes()).into_owned(),
            author_email: String::from_utf8_lossy(author.email_bytes()).into_owned(),
            timestamp,
        }
    }

    /// The commit this one was made on top of.
    pub fn first_parent(&self) -> Option<&Digest> {
        self.parents.first()
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Writes one commit object for a tree.
pub(crate) struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree: TreeId,
    parent: Option<CommitId>,
    signature: GitSignature,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository, tree: TreeId) -> Self {
        Self {
            repo,
            tree,
            parent: None,
            signature: GitSignature::stockroom(),
        }
    }

    /// Build on `parent`; `None` makes a root commit.
    pub fn on_top_of(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    pub fn authored_by(mut self, signature: &GitSignature) -> Self {
        self.signature = signature.clone();
        self
    }

    /// Write the commit object and return its id.
    pub fn write(self, message: &str) -> StorageResult<CommitId> {
        let tree = self.repo.find_tree(self.tree.raw())?;
        let sig = self.signature.to_git2_signature()?;
        let parent = self
            .parent
            .map(|id| {
                self.repo
                    .find_commit(id.raw())
                    .map_err(|_| StorageError::CommitNotFound(id.to_string()))
            })
            .transpose()?;

        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self.repo.commit(None, &sig, &sig, message, &tree, &parents)?;
        Ok(CommitId::new(oid))
    }
}

/// First-parent history from `head`, most recent first.
pub(crate) fn history(repo: &Repository, head: CommitId) -> StorageResult<Vec<CommitInfo>> {
    let mut walk = repo.revwalk()?;
    walk.push(head.raw())?;
    walk.simplify_first_parent()?;
    walk.set_sorting(Sort::TOPOLOGICAL)?;

    walk.map(|oid| -> StorageResult<CommitInfo> {
        let commit = repo.find_commit(oid?)?;
        Ok(CommitInfo::from_git2(&commit))
    })
    .collect()
}

/// Messages of the commits the store writes itself.
pub(crate) struct CommitMessage;

impl CommitMessage {
    /// Message of the detached commit holding the staging area.
    pub const STAGING: &'static str = "[stockroom] staging";

    /// A user message, trimmed; empty messages get a placeholder.
    pub fn user(message: &str) -> String {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            "[stockroom] commit".to_string()
        } else {
            trimmed.to_string()
        }
    }
}
