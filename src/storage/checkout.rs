//! Checkouts: handles into a store.
//!
//! A read checkout is pinned to one commit and never changes. A write
//! checkout holds the writer lock and works on the staging area; its changes
//! are saved back to staging on `flush`/`close` and become a commit on
//! `commit`. Dropping a checkout closes it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::storage::column::Columns;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::snapshot::{Metadata, Snapshot};
use crate::storage::store::{VersionedStore, WriterLease};
use crate::storage::types::Digest;

/// Access mode of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckoutMode {
    Read,
    Write,
}

impl fmt::Display for CheckoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckoutMode::Read => write!(f, "read"),
            CheckoutMode::Write => write!(f, "write"),
        }
    }
}

pub struct Checkout {
    store: Arc<dyn VersionedStore>,
    mode: CheckoutMode,
    /// Read: the pinned commit. Write: the head the staging area builds on.
    base: Option<Digest>,
    lease: Option<WriterLease>,
    snapshot: Snapshot,
    dirty: bool,
    closed: bool,
}

impl Checkout {
    /// Open a read checkout pinned to `digest`. `None` (no commits yet)
    /// gives an empty view.
    pub fn open_read(
        store: Arc<dyn VersionedStore>,
        digest: Option<&Digest>,
    ) -> StorageResult<Self> {
        let snapshot = match digest {
            Some(digest) => store.snapshot_at(digest)?,
            None => Snapshot::new(),
        };
        debug!(digest = digest.map(Digest::short), "opened read checkout");

        Ok(Self {
            store,
            mode: CheckoutMode::Read,
            base: digest.cloned(),
            lease: None,
            snapshot,
            dirty: false,
            closed: false,
        })
    }

    /// Open a write checkout on the staging area.
    ///
    /// Fails with `LockHeld` if any other write checkout is open.
    pub fn open_write(store: Arc<dyn VersionedStore>) -> StorageResult<Self> {
        let lease = store.acquire_writer()?;

        let loaded = store
            .head()
            .and_then(|head| Ok((head, store.load_staging(&lease)?)));
        let (base, snapshot) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                if let Err(release_err) = store.release_writer(&lease) {
                    warn!(error = %release_err, "failed to release writer lock after open error");
                }
                return Err(e);
            }
        };
        debug!(
            lease = lease.token(),
            base = base.as_ref().map(Digest::short),
            "opened write checkout"
        );

        Ok(Self {
            store,
            mode: CheckoutMode::Write,
            base,
            lease: Some(lease),
            snapshot,
            dirty: false,
            closed: false,
        })
    }

    pub fn mode(&self) -> CheckoutMode {
        self.mode
    }

    pub fn is_writable(&self) -> bool {
        self.mode == CheckoutMode::Write
    }

    /// The pinned commit of a read checkout, or the head a write checkout
    /// stages on top of.
    pub fn commit_hash(&self) -> Option<&Digest> {
        self.base.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether there are changes not yet saved to staging.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn metadata(&self) -> StorageResult<&Metadata> {
        self.ensure_open()?;
        Ok(&self.snapshot.metadata)
    }

    pub fn metadata_mut(&mut self) -> StorageResult<&mut Metadata> {
        self.ensure_writable()?;
        self.dirty = true;
        Ok(&mut self.snapshot.metadata)
    }

    pub fn columns(&self) -> StorageResult<&Columns> {
        self.ensure_open()?;
        Ok(&self.snapshot.columns)
    }

    pub fn columns_mut(&mut self) -> StorageResult<&mut Columns> {
        self.ensure_writable()?;
        self.dirty = true;
        Ok(&mut self.snapshot.columns)
    }

    /// Save pending changes to the staging area.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.ensure_writable()?;
        if !self.dirty {
            return Ok(());
        }
        let lease = self.lease()?;
        self.store.save_staging(lease, &self.snapshot)?;
        self.dirty = false;
        Ok(())
    }

    /// Commit the staged snapshot and return the new digest.
    pub fn commit(&mut self, message: &str) -> StorageResult<Digest> {
        self.ensure_writable()?;
        let lease = self.lease()?;
        let digest = self.store.commit(lease, &self.snapshot, message)?;
        info!(digest = digest.short(), message, "store commit");

        self.base = Some(digest.clone());
        self.dirty = false;
        Ok(digest)
    }

    /// Close the checkout. Write checkouts save staging and release the
    /// writer lock; the lock is released even if saving fails.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }

        let flushed = if self.mode == CheckoutMode::Write {
            self.flush()
        } else {
            Ok(())
        };
        self.closed = true;

        let released = match self.lease.take() {
            Some(lease) => self.store.release_writer(&lease),
            None => Ok(()),
        };
        debug!(mode = %self.mode, "closed checkout");

        flushed.and(released)
    }

    fn lease(&self) -> StorageResult<&WriterLease> {
        self.lease
            .as_ref()
            .ok_or_else(|| StorageError::Internal("write checkout without a lease".to_string()))
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.mode != CheckoutMode::Write {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(mode = %self.mode, error = %e, "failed to close checkout on drop");
        }
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("mode", &self.mode)
            .field("base", &self.base)
            .field("dirty", &self.dirty)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn store() -> Arc<dyn VersionedStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_read_checkout_is_read_only() {
        let store = store();
        let mut co = Checkout::open_read(store, None).unwrap();
        assert!(co.metadata().unwrap().is_empty());
        assert!(matches!(co.metadata_mut(), Err(StorageError::ReadOnly)));
        assert!(matches!(co.commit("nope"), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn test_single_writer() {
        let store = store();
        let mut first = Checkout::open_write(store.clone()).unwrap();
        let second = Checkout::open_write(store.clone());
        assert!(matches!(second, Err(StorageError::LockHeld { .. })));

        first.close().unwrap();
        let third = Checkout::open_write(store).unwrap();
        assert!(third.is_writable());
    }

    #[test]
    fn test_staging_survives_between_writers() {
        let store = store();
        {
            let mut co = Checkout::open_write(store.clone()).unwrap();
            co.metadata_mut().unwrap().set("k", "v");
        }

        let mut co = Checkout::open_write(store.clone()).unwrap();
        assert_eq!(co.metadata().unwrap().get("k"), Some("v"));
        let digest = co.commit("first").unwrap();
        assert_eq!(co.commit_hash(), Some(&digest));
        co.close().unwrap();

        let reader = Checkout::open_read(store, Some(&digest)).unwrap();
        assert_eq!(reader.metadata().unwrap().get("k"), Some("v"));
    }

    #[test]
    fn test_closed_checkout_rejects_access() {
        let store = store();
        let mut co = Checkout::open_read(store, None).unwrap();
        co.close().unwrap();
        co.close().unwrap();
        assert!(matches!(co.columns(), Err(StorageError::Closed)));
    }
}
