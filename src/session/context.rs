//! Session handles.
//!
//! A [`Session`] wraps a store checkout and records explicitly whether the
//! caller owns it (short-lived: closed when the handle is dropped or
//! closed) or borrows it from an optimized slot (closing is a no-op, the
//! slot's owner closes it on `exit_optimized`).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::session::error::SessionResult;
use crate::session::registry::SharedCheckout;
use crate::storage::{Checkout, CheckoutMode, Digest};

/// Whether a session handle is responsible for closing its checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Opened for this call; closed when the handle goes away.
    Owned,
    /// Shared from an optimized slot; never closed by the handle.
    Borrowed,
}

pub struct Session {
    id: String,
    mode: CheckoutMode,
    ownership: Ownership,
    checkout: SharedCheckout,
    released: bool,
}

impl Session {
    pub(crate) fn owned(checkout: Checkout) -> Self {
        let session = Self {
            id: Ulid::new().to_string().to_lowercase(),
            mode: checkout.mode(),
            ownership: Ownership::Owned,
            checkout: Arc::new(Mutex::new(checkout)),
            released: false,
        };
        debug!(session = %session.id, mode = %session.mode, "opened session");
        session
    }

    pub(crate) fn borrowed(mode: CheckoutMode, checkout: SharedCheckout) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            mode,
            ownership: Ownership::Borrowed,
            checkout,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> CheckoutMode {
        self.mode
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    /// The commit a read session is pinned to (or a write session builds on).
    pub fn pinned_digest(&self) -> Option<Digest> {
        self.checkout.lock().commit_hash().cloned()
    }

    /// Run `f` with shared access to the checkout.
    pub fn with<T, E>(&self, f: impl FnOnce(&Checkout) -> Result<T, E>) -> Result<T, E> {
        let checkout = self.checkout.lock();
        f(&checkout)
    }

    /// Run `f` with mutable access to the checkout.
    pub fn with_mut<T, E>(&self, f: impl FnOnce(&mut Checkout) -> Result<T, E>) -> Result<T, E> {
        let mut checkout = self.checkout.lock();
        f(&mut checkout)
    }

    /// Release the session. Owned sessions close their checkout (flushing a
    /// write session's staging area and releasing the writer lock); borrowed
    /// sessions just drop their handle.
    pub fn close(mut self) -> SessionResult<()> {
        self.release()
    }

    fn release(&mut self) -> SessionResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if self.ownership == Ownership::Owned {
            self.checkout.lock().close()?;
            debug!(session = %self.id, mode = %self.mode, "closed session");
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(session = %self.id, mode = %self.mode, error = %e, "failed to release session");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("ownership", &self.ownership)
            .finish()
    }
}
