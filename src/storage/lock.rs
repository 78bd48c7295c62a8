//! Cross-process writer lock for the git store.
//!
//! The lock is a file inside the store directory created with `create_new`,
//! so exactly one process can hold it. The file contains the holder string
//! of the lease that created it; releasing checks that string so a stale
//! lease can't delete somebody else's lock.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::WriterLease;

#[derive(Debug)]
pub(crate) struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub const FILE_NAME: &'static str = "stockroom-writer.lock";

    pub fn new(store_dir: &Path) -> Self {
        Self {
            path: store_dir.join(Self::FILE_NAME),
        }
    }

    pub fn acquire(&self) -> StorageResult<WriterLease> {
        self.acquire_with(|file, lease| {
            file.write_all(lease.holder().as_bytes())?;
            file.sync_all()
        })
    }

    /// Create the lock file and fill it with `write`. A failed write removes
    /// the file again.
    fn acquire_with<F>(&self, write: F) -> StorageResult<WriterLease>
    where
        F: FnOnce(&mut File, &WriterLease) -> io::Result<()>,
    {
        let lease = WriterLease::new();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::LockHeld {
                    holder: self.holder(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = write(&mut file, &lease) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %cleanup,
                    "failed to remove half-written writer lock"
                );
            }
            return Err(e.into());
        }
        debug!(holder = %lease.holder(), "acquired writer lock");
        Ok(lease)
    }

    /// Holder string of the current lock, `None` if unlocked or unreadable.
    pub fn holder(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn owns(&self, lease: &WriterLease) -> bool {
        self.holder().as_deref() == Some(lease.holder().as_str())
    }

    pub fn release(&self, lease: &WriterLease) -> StorageResult<()> {
        if !self.owns(lease) {
            return Err(StorageError::LeaseMismatch(lease.token().to_string()));
        }
        fs::remove_file(&self.path)?;
        debug!(holder = %lease.holder(), "released writer lock");
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    pub fn force_release(&self) -> StorageResult<bool> {
        let holder = self.holder();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                let holder = holder.as_deref().unwrap_or("unknown");
                warn!(holder, "force-released writer lock");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
