//! The head pointer: `head.stock` at the stock root.
//!
//! It holds the digest of the last commit made through this crate (empty
//! before the first commit). Read sessions pin to it. It is rewritten once
//! per successful commit, strictly after the store accepted the commit, so
//! a crash in between leaves it stale instead of dangling.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::session::error::{SessionError, SessionResult};
use crate::storage::Digest;

pub const HEAD_FILE: &str = "head.stock";

#[derive(Debug, Clone)]
pub struct HeadPointer {
    root: PathBuf,
    path: PathBuf,
}

impl HeadPointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let path = root.join(HEAD_FILE);
        Self { root, path }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Current digest, `None` when no commit has been recorded yet.
    pub fn read(&self) -> SessionResult<Option<Digest>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Digest::parse_optional(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SessionError::NotInitialized(self.root.clone()))
            }
            Err(e) => Err(SessionError::io(&self.path, e)),
        }
    }

    /// Atomically replace the pointer with `digest`.
    pub fn write(&self, digest: &Digest) -> SessionResult<()> {
        self.write_raw(digest.as_str())?;
        debug!(digest = digest.short(), "head pointer updated");
        Ok(())
    }

    /// Create the pointer if it doesn't exist yet. An existing pointer is
    /// left untouched. Returns whether the file was created.
    pub fn init(&self, digest: Option<&Digest>) -> SessionResult<bool> {
        if self.exists() {
            return Ok(false);
        }
        self.write_raw(digest.map(Digest::as_str).unwrap_or(""))?;
        Ok(true)
    }

    fn write_raw(&self, content: &str) -> SessionResult<()> {
        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|e| SessionError::io(&self.root, e))?;
        tmp.write_all(content.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| SessionError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| SessionError::io(&self.path, e.error))?;
        Ok(())
    }
}

/// Walk up from `start` to the first directory holding a head pointer.
pub fn find_stock_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(HEAD_FILE).is_file())
        .map(Path::to_path_buf)
}
