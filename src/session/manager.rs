//! Session manager - coordinates every checkout of a stock root.
//!
//! The SessionManager is the only component that opens store checkouts.
//! It handles:
//! - Short-lived sessions opened for one call and closed on return
//! - Optimized (long-lived) sessions shared through the registry
//! - Read sessions pinned to the head pointer
//! - Commit-then-pointer-write ordering

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::session::context::Session;
use crate::session::error::{SessionError, SessionResult};
use crate::session::head::HeadPointer;
use crate::session::registry::{OptimizedSlots, SessionRegistry};
use crate::storage::{Checkout, CheckoutMode, CommitInfo, Digest, StorageError, VersionedStore};

/// Session manager for one stock root.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Canonical stock root.
    root: PathBuf,
    head: HeadPointer,
    store: Arc<dyn VersionedStore>,
    /// Shared with every manager of the same root and registry.
    slots: Arc<Mutex<OptimizedSlots>>,
}

impl SessionManager {
    /// Create a manager for an initialized stock root.
    pub fn new(
        registry: &SessionRegistry,
        root: impl AsRef<Path>,
        store: Arc<dyn VersionedStore>,
    ) -> SessionResult<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SessionError::NotInitialized(root.to_path_buf()),
            _ => SessionError::io(root, e),
        })?;

        let head = HeadPointer::new(&root);
        if !head.exists() {
            return Err(SessionError::NotInitialized(root));
        }
        let slots = registry.slots_for(&root);

        Ok(Self {
            inner: Arc::new(SessionManagerInner {
                root,
                head,
                store,
                slots,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn head_pointer(&self) -> &HeadPointer {
        &self.inner.head
    }

    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.inner.store
    }

    /// A read session: the optimized one if open, otherwise a fresh one
    /// pinned to the head pointer.
    pub fn acquire_read(&self) -> SessionResult<Session> {
        self.acquire(CheckoutMode::Read)
    }

    /// A write session: the optimized one if open, otherwise a fresh one.
    ///
    /// Fails with `LockHeld` if any write session is open on this store.
    pub fn acquire_write(&self) -> SessionResult<Session> {
        self.acquire(CheckoutMode::Write)
    }

    fn acquire(&self, mode: CheckoutMode) -> SessionResult<Session> {
        if let Some(shared) = self.inner.slots.lock().get(mode) {
            return Ok(Session::borrowed(mode, shared.clone()));
        }
        Ok(Session::owned(self.open(mode)?))
    }

    fn open(&self, mode: CheckoutMode) -> SessionResult<Checkout> {
        match mode {
            CheckoutMode::Read => self.open_read(),
            CheckoutMode::Write => self.open_write(),
        }
    }

    fn open_read(&self) -> SessionResult<Checkout> {
        let digest = self.inner.head.read()?;
        Ok(Checkout::open_read(self.inner.store.clone(), digest.as_ref())?)
    }

    fn open_write(&self) -> SessionResult<Checkout> {
        let checkout = Checkout::open_write(self.inner.store.clone())
            .map_err(|e| self.lock_error(e))?;

        // refuse to stage on top of a commit other than the one the pointer records
        let pointer = self.inner.head.read()?;
        if let Some(pointer) = pointer {
            if checkout.commit_hash() != Some(&pointer) {
                return Err(SessionError::StaleHead {
                    pointer: pointer.to_string(),
                    store: checkout
                        .commit_hash()
                        .map(Digest::to_string)
                        .unwrap_or_else(|| "empty".to_string()),
                });
            }
        }
        Ok(checkout)
    }

    fn lock_error(&self, error: StorageError) -> SessionError {
        match error {
            StorageError::LockHeld { holder } => SessionError::LockHeld {
                root: self.inner.root.clone(),
                holder,
            },
            other => other.into(),
        }
    }

    /// Open a long-lived session of `mode` shared by every later acquire.
    ///
    /// Fails with `Reentrancy` if one is already open for this root.
    pub fn enter_optimized(&self, mode: CheckoutMode) -> SessionResult<()> {
        let mut slots = self.inner.slots.lock();
        if slots.get(mode).is_some() {
            return Err(SessionError::Reentrancy { mode });
        }
        let checkout = self.open(mode)?;
        *slots.slot_mut(mode) = Some(Arc::new(Mutex::new(checkout)));
        debug!(root = %self.inner.root.display(), %mode, "entered optimized session");
        Ok(())
    }

    /// Close and clear the optimized session of `mode`. A no-op when none
    /// is open.
    ///
    /// Borrowed handles still alive afterwards see a closed checkout.
    pub fn exit_optimized(&self, mode: CheckoutMode) -> SessionResult<()> {
        let taken = self.inner.slots.lock().slot_mut(mode).take();
        if let Some(shared) = taken {
            let closed = shared.lock().close();
            debug!(root = %self.inner.root.display(), %mode, "exited optimized session");
            closed?;
        }
        Ok(())
    }

    /// Enter an optimized session that is exited when the guard is dropped.
    pub fn optimize(&self, mode: CheckoutMode) -> SessionResult<OptimizeGuard> {
        self.enter_optimized(mode)?;
        Ok(OptimizeGuard {
            manager: self.clone(),
            mode,
            exited: false,
        })
    }

    /// Run `f` inside an optimized session of `mode`; the session is closed
    /// on every exit path.
    pub fn with_optimized<F, T, E>(&self, mode: CheckoutMode, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<SessionError>,
    {
        let guard = self.optimize(mode)?;
        let result = f(self);
        let exited = guard.exit();

        match result {
            Ok(value) => {
                exited?;
                Ok(value)
            }
            Err(e) => {
                if let Err(exit_err) = exited {
                    warn!(%mode, error = %exit_err, "failed to exit optimized session after error");
                }
                Err(e)
            }
        }
    }

    pub fn is_optimized(&self, mode: CheckoutMode) -> bool {
        self.inner.slots.lock().get(mode).is_some()
    }

    /// Number of live borrowed handles on the optimized session of `mode`.
    pub fn optimized_users(&self, mode: CheckoutMode) -> Option<usize> {
        self.inner
            .slots
            .lock()
            .get(mode)
            .map(|shared| Arc::strong_count(shared) - 1)
    }

    /// Commit the staging area and record the new digest in the head pointer.
    ///
    /// An open optimized read session keeps its pinned digest until
    /// [`refresh_read`](Self::refresh_read).
    pub fn commit(&self, message: &str) -> SessionResult<Digest> {
        let session = self.acquire_write()?;
        let digest = session.with_mut(|checkout| checkout.commit(message))?;
        self.inner.head.write(&digest)?;
        session.close()?;

        info!(root = %self.inner.root.display(), digest = digest.short(), "committed");
        Ok(digest)
    }

    /// Re-pin the optimized read session to the current head pointer.
    ///
    /// Handles borrowed before the refresh keep their old pin. Returns
    /// whether an optimized read session was open.
    pub fn refresh_read(&self) -> SessionResult<bool> {
        let mut slots = self.inner.slots.lock();
        if slots.get(CheckoutMode::Read).is_none() {
            return Ok(false);
        }
        let fresh = self.open_read()?;
        *slots.slot_mut(CheckoutMode::Read) = Some(Arc::new(Mutex::new(fresh)));
        Ok(true)
    }

    /// Digest recorded in the head pointer.
    pub fn head(&self) -> SessionResult<Option<Digest>> {
        self.inner.head.read()
    }

    /// Commit history of the store, most recent first.
    pub fn log(&self) -> SessionResult<Vec<CommitInfo>> {
        Ok(self.inner.store.log()?)
    }

    pub fn writer_lock_held(&self) -> SessionResult<bool> {
        Ok(self.inner.store.writer_lock_held()?)
    }

    /// Drop a writer lock left behind by a crashed process.
    pub fn force_release_writer_lock(&self) -> SessionResult<bool> {
        Ok(self.inner.store.force_release_writer_lock()?)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("root", &self.inner.root)
            .field("optimized_read", &self.is_optimized(CheckoutMode::Read))
            .field("optimized_write", &self.is_optimized(CheckoutMode::Write))
            .finish()
    }
}

/// Scope of an optimized session; exits it on drop.
#[must_use = "the optimized session is closed when the guard is dropped"]
pub struct OptimizeGuard {
    manager: SessionManager,
    mode: CheckoutMode,
    exited: bool,
}

impl OptimizeGuard {
    pub fn mode(&self) -> CheckoutMode {
        self.mode
    }

    /// Exit now and report close errors instead of logging them.
    pub fn exit(mut self) -> SessionResult<()> {
        self.exited = true;
        self.manager.exit_optimized(self.mode)
    }
}

impl Drop for OptimizeGuard {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if let Err(e) = self.manager.exit_optimized(self.mode) {
            warn!(mode = %self.mode, error = %e, "failed to exit optimized session");
        }
    }
}

impl std::fmt::Debug for OptimizeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizeGuard").field("mode", &self.mode).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{GitStore, MemoryStore};
    use tempfile::TempDir;

    fn setup_with(store: Arc<dyn VersionedStore>) -> (TempDir, SessionRegistry, SessionManager) {
        let dir = TempDir::new().unwrap();
        HeadPointer::new(dir.path()).init(None).unwrap();
        let registry = SessionRegistry::new();
        let manager = SessionManager::new(&registry, dir.path(), store).unwrap();
        (dir, registry, manager)
    }

    fn setup() -> (TempDir, SessionRegistry, SessionManager, MemoryStore) {
        let store = MemoryStore::new();
        let (dir, registry, manager) = setup_with(Arc::new(store.clone()));
        (dir, registry, manager, store)
    }

    fn put(manager: &SessionManager, key: &str, value: &str) {
        let session = manager.acquire_write().unwrap();
        session
            .with_mut(|co| {
                co.metadata_mut()?.set(key, value);
                Ok::<_, StorageError>(())
            })
            .unwrap();
        session.close().unwrap();
    }

    fn get(session: &Session, key: &str) -> Option<String> {
        session
            .with(|co| co.metadata().map(|m| m.get(key).map(str::to_string)))
            .unwrap()
    }

    #[test]
    fn test_uninitialized_root() {
        let dir = TempDir::new().unwrap();
        let result =
            SessionManager::new(&SessionRegistry::new(), dir.path(), Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(SessionError::NotInitialized(_))));
    }

    #[test]
    fn test_commit_updates_pointer_and_log() {
        let (_dir, _registry, manager, _store) = setup();
        assert_eq!(manager.head().unwrap(), None);

        put(&manager, "k", "1");
        let m1 = manager.commit("m1").unwrap();
        put(&manager, "k", "2");
        let m2 = manager.commit("m2").unwrap();

        assert_eq!(manager.head().unwrap(), Some(m2.clone()));
        let raw = std::fs::read_to_string(manager.head_pointer().path()).unwrap();
        assert_eq!(raw, m2.as_str());

        let log: Vec<_> = manager.log().unwrap().into_iter().map(|c| c.digest).collect();
        assert_eq!(log, vec![m2, m1]);
        assert!(!manager.writer_lock_held().unwrap());
    }

    #[test]
    fn test_read_session_stays_pinned() {
        let (_dir, _registry, manager, _store) = setup();
        put(&manager, "k", "old");
        let first = manager.commit("first").unwrap();

        let reader = manager.acquire_read().unwrap();
        assert_eq!(reader.pinned_digest(), Some(first.clone()));

        put(&manager, "k", "new");
        manager.commit("second").unwrap();

        assert_eq!(reader.pinned_digest(), Some(first));
        assert_eq!(get(&reader, "k").as_deref(), Some("old"));

        let fresh = manager.acquire_read().unwrap();
        assert_eq!(get(&fresh, "k").as_deref(), Some("new"));
    }

    #[test]
    fn test_second_writer_fails_fast() {
        let (_dir, _registry, manager, _store) = setup();
        let first = manager.acquire_write().unwrap();

        let second = manager.acquire_write();
        assert!(matches!(second, Err(SessionError::LockHeld { .. })));

        first.close().unwrap();
        manager.acquire_write().unwrap();
    }

    #[test]
    fn test_second_store_handle_sees_lock() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join(".stock");
        HeadPointer::new(dir.path()).init(None).unwrap();

        let a = SessionManager::new(
            &SessionRegistry::new(),
            dir.path(),
            Arc::new(GitStore::init(&store_dir, None).unwrap()),
        )
        .unwrap();
        // a separate registry and store handle behave like another process
        let b = SessionManager::new(
            &SessionRegistry::new(),
            dir.path(),
            Arc::new(GitStore::open(&store_dir).unwrap()),
        )
        .unwrap();

        let writer = a.acquire_write().unwrap();
        let err = b.acquire_write().unwrap_err();
        assert!(err.is_lock_held());
        drop(writer);
        b.acquire_write().unwrap();
    }

    #[test]
    fn test_failed_commit_leaves_pointer() {
        let (_dir, _registry, manager, store) = setup();
        put(&manager, "k", "v");
        let good = manager.commit("good").unwrap();

        put(&manager, "k", "w");
        store.reject_next_commit("simulated failure");
        let result = manager.commit("bad");
        assert!(matches!(result, Err(SessionError::Storage(StorageError::CommitRejected(_)))));

        assert_eq!(manager.head().unwrap(), Some(good));
        assert!(!manager.writer_lock_held().unwrap());
    }

    #[test]
    fn test_optimized_sessions_are_shared() {
        let (dir, registry, manager, store) = setup();
        let other = SessionManager::new(&registry, dir.path(), Arc::new(store)).unwrap();

        manager.enter_optimized(CheckoutMode::Write).unwrap();
        let a = manager.acquire_write().unwrap();
        let b = other.acquire_write().unwrap();
        assert!(!a.is_owned());
        assert!(!b.is_owned());
        assert_eq!(manager.optimized_users(CheckoutMode::Write), Some(2));

        // nested optimization is rejected, not reused
        let nested = other.enter_optimized(CheckoutMode::Write);
        assert!(matches!(nested, Err(SessionError::Reentrancy { .. })));

        drop((a, b));
        manager.exit_optimized(CheckoutMode::Write).unwrap();
        assert!(!manager.is_optimized(CheckoutMode::Write));
        assert!(!manager.writer_lock_held().unwrap());
    }

    #[test]
    fn test_optimized_read_keeps_pin_until_refresh() {
        let (_dir, _registry, manager, _store) = setup();
        put(&manager, "k", "old");
        manager.commit("first").unwrap();

        let _guard = manager.optimize(CheckoutMode::Read).unwrap();
        put(&manager, "k", "new");
        manager.commit("second").unwrap();

        let reader = manager.acquire_read().unwrap();
        assert_eq!(get(&reader, "k").as_deref(), Some("old"));

        assert!(manager.refresh_read().unwrap());
        let refreshed = manager.acquire_read().unwrap();
        assert_eq!(get(&refreshed, "k").as_deref(), Some("new"));
        // the handle taken before the refresh keeps its pin
        assert_eq!(get(&reader, "k").as_deref(), Some("old"));
    }

    #[test]
    fn test_with_optimized_exits_on_error() {
        let (_dir, _registry, manager, _store) = setup();
        let result: SessionResult<()> = manager.with_optimized(CheckoutMode::Write, |m| {
            assert!(m.is_optimized(CheckoutMode::Write));
            Err(SessionError::NotInitialized(PathBuf::from("boom")))
        });
        assert!(result.is_err());
        assert!(!manager.is_optimized(CheckoutMode::Write));
        assert!(!manager.writer_lock_held().unwrap());
    }

    #[test]
    fn test_guard_exits_on_panic() {
        let (_dir, _registry, manager, _store) = setup();
        let cloned = manager.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cloned.optimize(CheckoutMode::Write).unwrap();
            panic!("body failed");
        }));
        assert!(outcome.is_err());
        assert!(!manager.is_optimized(CheckoutMode::Write));
        assert!(!manager.writer_lock_held().unwrap());
    }

    #[test]
    fn test_commit_inside_optimized_write() {
        let (_dir, _registry, manager, _store) = setup();
        manager
            .with_optimized(CheckoutMode::Write, |m| {
                put(m, "a", "1");
                let first = m.commit("one")?;
                put(m, "b", "2");
                let second = m.commit("two")?;
                assert_ne!(first, second);
                Ok::<_, SessionError>(())
            })
            .unwrap();
        assert_eq!(manager.log().unwrap().len(), 2);
    }

    #[test]
    fn test_stale_head_refuses_writes() {
        let (_dir, _registry, manager, _store) = setup();
        put(&manager, "k", "v");
        manager.commit("first").unwrap();

        manager
            .head_pointer()
            .write(&Digest::new("deadbeef").unwrap())
            .unwrap();
        let result = manager.acquire_write();
        assert!(matches!(result, Err(SessionError::StaleHead { .. })));
        // the refused checkout released the lock
        assert!(!manager.writer_lock_held().unwrap());
    }

    #[test]
    fn test_force_release() {
        let (_dir, _registry, manager, _store) = setup();
        let session = manager.acquire_write().unwrap();
        assert!(manager.force_release_writer_lock().unwrap());
        assert!(!manager.writer_lock_held().unwrap());
        // closing the orphaned session reports the lost lease
        assert!(session.close().is_err());
    }
}
