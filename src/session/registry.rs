//! Per-root shared session state.
//!
//! Every [`SessionManager`](crate::session::SessionManager) built from the
//! same registry for the same (canonical) root shares one set of optimized
//! slots, so two independently constructed facades can never each open their
//! own long-lived write session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::{Checkout, CheckoutMode};

/// A checkout shared between every borrowed handle of an optimized session.
pub(crate) type SharedCheckout = Arc<Mutex<Checkout>>;

/// The long-lived sessions of one root.
#[derive(Debug, Default)]
pub(crate) struct OptimizedSlots {
    read: Option<SharedCheckout>,
    write: Option<SharedCheckout>,
}

impl OptimizedSlots {
    pub fn get(&self, mode: CheckoutMode) -> Option<&SharedCheckout> {
        match mode {
            CheckoutMode::Read => self.read.as_ref(),
            CheckoutMode::Write => self.write.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, mode: CheckoutMode) -> &mut Option<SharedCheckout> {
        match mode {
            CheckoutMode::Read => &mut self.read,
            CheckoutMode::Write => &mut self.write,
        }
    }
}

/// Registry of session state keyed by canonical root path.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    roots: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<OptimizedSlots>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots for `root`, created empty on first use. `root` must already be
    /// canonical.
    pub(crate) fn slots_for(&self, root: &Path) -> Arc<Mutex<OptimizedSlots>> {
        self.roots
            .lock()
            .entry(root.to_path_buf())
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("roots", &self.roots.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_root_shares_slots() {
        let registry = SessionRegistry::new();
        let a = registry.slots_for(Path::new("/stocks/one"));
        let b = registry.clone().slots_for(Path::new("/stocks/one"));
        let c = registry.slots_for(Path::new("/stocks/two"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_separate_registries_are_independent() {
        let a = SessionRegistry::new().slots_for(Path::new("/stocks/one"));
        let b = SessionRegistry::new().slots_for(Path::new("/stocks/one"));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
