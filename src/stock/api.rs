//! StockRoom API - high-level interface over one stock root.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::codec::CodecError;
use crate::session::{HeadPointer, OptimizeGuard, SessionError, SessionManager, SessionRegistry};
use crate::stock::data::DataStore;
use crate::stock::generic::GenericStore;
use crate::stock::model::ModelStore;
use crate::stock::tag::{ParamStore, TagStore};
use crate::storage::{
    CheckoutMode, CommitInfo, Digest, GitSignature, GitStore, StorageError, VersionedStore,
};

/// Directory of the git store inside a stock root.
pub const STORE_DIR: &str = ".stock";

/// Result type for stock operations.
pub type StockResult<T> = Result<T, StockError>;

/// Stock errors.
#[derive(Debug, Error)]
pub enum StockError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("stock not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StockError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StockError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error indicates the resource doesn't exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StockError::NotFound(_) => true,
            StockError::Storage(e) => e.is_not_found(),
            StockError::Session(e) => e.is_not_found(),
            StockError::Codec(e) => e.is_not_found(),
            StockError::Io { .. } => false,
        }
    }

    /// Check if this error means another writer is active.
    pub fn is_lock_held(&self) -> bool {
        match self {
            StockError::Storage(e) => e.is_lock_held(),
            StockError::Session(e) => e.is_lock_held(),
            StockError::Codec(CodecError::Storage(e)) => e.is_lock_held(),
            _ => false,
        }
    }
}

/// Options for [`StockRoom::init`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Author of every commit; defaults to the stockroom signature.
    pub signature: Option<GitSignature>,
    /// Wipe an existing store and head pointer instead of keeping them.
    pub overwrite: bool,
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signature(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.signature = Some(GitSignature::new(name, email));
        self
    }

    pub fn overwrite(mut self, value: bool) -> Self {
        self.overwrite = value;
        self
    }
}

/// Stock configuration options.
#[derive(Debug, Clone)]
pub struct StockConfig {
    /// Path to the stock root (the directory holding `head.stock`).
    pub path: PathBuf,
    /// Signature used if the stock has to be created.
    pub signature: Option<GitSignature>,
    /// Initialize the stock if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            signature: None,
            create_if_missing: false,
        }
    }
}

impl StockConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn signature(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.signature = Some(GitSignature::new(name, email));
        self
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

/// Which optimized sessions [`StockRoom::optimize`] opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeMode {
    Read,
    Write,
    ReadWrite,
}

impl OptimizeMode {
    fn reads(self) -> bool {
        matches!(self, OptimizeMode::Read | OptimizeMode::ReadWrite)
    }

    fn writes(self) -> bool {
        matches!(self, OptimizeMode::Write | OptimizeMode::ReadWrite)
    }
}

/// The main stock handle.
///
/// Cheap to clone; every clone and every facade shares one session manager.
#[derive(Debug, Clone)]
pub struct StockRoom {
    manager: SessionManager,
}

impl StockRoom {
    /// Create the git store, head pointer and `.gitignore` entry at `root`.
    ///
    /// An existing store is kept unless `options.overwrite` is set.
    pub fn init(
        root: impl AsRef<Path>,
        options: InitOptions,
        registry: &SessionRegistry,
    ) -> StockResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| StockError::io(root, e))?;

        let store_path = root.join(STORE_DIR);
        let head = HeadPointer::new(root);

        if options.overwrite && store_path.exists() {
            warn!(root = %root.display(), "overwriting existing stock");
            fs::remove_dir_all(&store_path).map_err(|e| StockError::io(&store_path, e))?;
            if head.exists() {
                fs::remove_file(head.path()).map_err(|e| StockError::io(head.path(), e))?;
            }
        }

        let store = if GitStore::exists(&store_path) {
            info!(root = %root.display(), "stock already initialized");
            GitStore::open(&store_path)?
        } else {
            let store = GitStore::init(&store_path, options.signature.as_ref())?;
            info!(root = %root.display(), "initialized stock");
            store
        };

        head.init(store.head()?.as_ref())?;
        add_gitignore_entry(root)?;

        if git2::Repository::discover(root).map_or(true, |repo| repo.is_bare()) {
            warn!(
                root = %root.display(),
                "stock root is not inside a git working tree; data versions are not linked to code"
            );
        }

        Self::open_with_store(root, Arc::new(store), registry)
    }

    /// Open an initialized stock.
    pub fn open(root: impl AsRef<Path>, registry: &SessionRegistry) -> StockResult<Self> {
        Self::open_with_config(StockConfig::new(root.as_ref()), registry)
    }

    /// Open a stock with custom configuration.
    pub fn open_with_config(config: StockConfig, registry: &SessionRegistry) -> StockResult<Self> {
        let store_path = config.path.join(STORE_DIR);
        if !GitStore::exists(&store_path) {
            if !config.create_if_missing {
                return Err(StockError::NotFound(config.path));
            }
            let options = InitOptions {
                signature: config.signature,
                overwrite: false,
            };
            return Self::init(&config.path, options, registry);
        }

        let store = GitStore::open(&store_path)?;
        Self::open_with_store(&config.path, Arc::new(store), registry)
    }

    /// Open `root` over an explicit store, creating the head pointer from
    /// the store's head if it is missing.
    pub fn open_with_store(
        root: impl AsRef<Path>,
        store: Arc<dyn VersionedStore>,
        registry: &SessionRegistry,
    ) -> StockResult<Self> {
        let root = root.as_ref();
        HeadPointer::new(root).init(store.head()?.as_ref())?;
        let manager = SessionManager::new(registry, root, store)?;
        Ok(Self { manager })
    }

    pub fn root(&self) -> &Path {
        self.manager.root()
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn data(&self) -> DataStore {
        DataStore::new(self.manager.clone())
    }

    pub fn model(&self) -> ModelStore {
        ModelStore::new(self.manager.clone())
    }

    pub fn tag(&self) -> TagStore {
        TagStore::new(self.manager.clone())
    }

    pub fn param(&self) -> ParamStore {
        ParamStore::new(self.manager.clone())
    }

    pub fn generic(&self) -> GenericStore {
        GenericStore::new(self.manager.clone())
    }

    /// Commit staged changes and advance the head pointer.
    pub fn commit(&self, message: &str) -> StockResult<Digest> {
        Ok(self.manager.commit(message)?)
    }

    /// Open optimized sessions that stay open until the guard is dropped.
    ///
    /// With [`OptimizeMode::ReadWrite`] a failure to open the write session
    /// closes the read session again.
    pub fn optimize(&self, mode: OptimizeMode) -> StockResult<StockGuard> {
        let read = if mode.reads() {
            Some(self.manager.optimize(CheckoutMode::Read)?)
        } else {
            None
        };
        let write = if mode.writes() {
            Some(self.manager.optimize(CheckoutMode::Write)?)
        } else {
            None
        };
        Ok(StockGuard { write, read })
    }

    /// Run `f` with optimized sessions of `mode`, closing them on every exit
    /// path.
    pub fn with_optimized<F, T>(&self, mode: OptimizeMode, f: F) -> StockResult<T>
    where
        F: FnOnce(&Self) -> StockResult<T>,
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
                    warn!(error = %exit_err, "failed to exit optimized sessions after error");
                }
                Err(e)
            }
        }
    }

    /// Re-pin an optimized read session to the latest commit.
    pub fn refresh(&self) -> StockResult<bool> {
        Ok(self.manager.refresh_read()?)
    }

    /// Digest recorded in `head.stock`.
    pub fn head(&self) -> StockResult<Option<Digest>> {
        Ok(self.manager.head()?)
    }

    /// Commit history, most recent first.
    pub fn log(&self) -> StockResult<Vec<CommitInfo>> {
        Ok(self.manager.log()?)
    }

    /// Remove a writer lock left behind by a crashed process.
    pub fn liberate(&self) -> StockResult<bool> {
        Ok(self.manager.force_release_writer_lock()?)
    }
}

/// Optimized sessions opened by [`StockRoom::optimize`].
///
/// The write session closes before the read session.
#[must_use = "the optimized sessions are closed when the guard is dropped"]
#[derive(Debug)]
pub struct StockGuard {
    write: Option<OptimizeGuard>,
    read: Option<OptimizeGuard>,
}

impl StockGuard {
    /// Close both sessions now and report the first error.
    pub fn exit(self) -> StockResult<()> {
        let write = self.write.map(OptimizeGuard::exit).transpose();
        let read = self.read.map(OptimizeGuard::exit).transpose();
        write?;
        read?;
        Ok(())
    }
}

fn add_gitignore_entry(root: &Path) -> StockResult<()> {
    let path = root.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(StockError::io(&path, e)),
    };
    if existing.lines().any(|line| line.trim() == STORE_DIR) {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StockError::io(&path, e))?;
    let separator = if existing.is_empty() || existing.ends_with('\n') { "" } else { "\n" };
    writeln!(file, "{}{}", separator, STORE_DIR).map_err(|e| StockError::io(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Scalar;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SessionRegistry, StockRoom) {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let stock = StockRoom::init(dir.path(), InitOptions::new(), &registry).unwrap();
        (dir, registry, stock)
    }

    #[test]
    fn test_init_layout() {
        let (dir, _registry, stock) = setup();
        assert!(dir.path().join(STORE_DIR).is_dir());
        assert!(dir.path().join("head.stock").is_file());
        assert_eq!(stock.head().unwrap(), None);

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.lines().filter(|l| *l == STORE_DIR).count(), 1);
    }

    #[test]
    fn test_reinit_keeps_history() {
        let (dir, registry, stock) = setup();
        stock.tag().set("epochs", 10).unwrap();
        let digest = stock.commit("first").unwrap();

        let again = StockRoom::init(dir.path(), InitOptions::new(), &registry).unwrap();
        assert_eq!(again.head().unwrap(), Some(digest));

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.lines().filter(|l| *l == STORE_DIR).count(), 1);
    }

    #[test]
    fn test_reinit_with_overwrite_starts_empty() {
        let (dir, registry, stock) = setup();
        stock.tag().set("epochs", 10).unwrap();
        stock.commit("first").unwrap();
        drop(stock);

        let fresh =
            StockRoom::init(dir.path(), InitOptions::new().overwrite(true), &registry).unwrap();
        assert_eq!(fresh.head().unwrap(), None);
        assert!(fresh.log().unwrap().is_empty());
    }

    #[test]
    fn test_gitignore_appends_after_existing_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target").unwrap();
        StockRoom::init(dir.path(), InitOptions::new(), &SessionRegistry::new()).unwrap();

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore, "target\n.stock\n");
    }

    #[test]
    fn test_open_missing_stock() {
        let dir = TempDir::new().unwrap();
        let err = StockRoom::open(dir.path(), &SessionRegistry::new()).unwrap_err();
        assert!(err.is_not_found());

        let created = StockRoom::open_with_config(
            StockConfig::new(dir.path()).create_if_missing(true),
            &SessionRegistry::new(),
        )
        .unwrap();
        assert_eq!(created.head().unwrap(), None);
    }

    #[test]
    fn test_commit_log_order() {
        let (_dir, _registry, stock) = setup();
        stock.tag().set("a", 1).unwrap();
        let m1 = stock.commit("m1").unwrap();
        stock.tag().set("b", 2).unwrap();
        let m2 = stock.commit("m2").unwrap();

        assert_eq!(stock.head().unwrap(), Some(m2.clone()));
        let log = stock.log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].digest, m2);
        assert_eq!(log[1].digest, m1);
        assert_eq!(log[0].summary(), "m2");
    }

    #[test]
    fn test_optimize_read_write_shares_sessions() {
        let (_dir, _registry, stock) = setup();
        let guard = stock.optimize(OptimizeMode::ReadWrite).unwrap();
        assert!(stock.manager().is_optimized(CheckoutMode::Read));
        assert!(stock.manager().is_optimized(CheckoutMode::Write));

        stock.tag().set("lr", 0.1).unwrap();
        stock.param().set("batch", 32).unwrap();
        stock.commit("batched").unwrap();
        guard.exit().unwrap();

        assert!(!stock.manager().is_optimized(CheckoutMode::Write));
        assert!(!stock.manager().writer_lock_held().unwrap());
        assert_eq!(stock.param().get("batch").unwrap(), Scalar::Int(32));
    }

    #[test]
    fn test_optimize_read_write_rolls_back_read_on_lock_failure() {
        let (_dir, _registry, stock) = setup();
        let outside = stock.manager().acquire_write().unwrap();

        let err = stock.optimize(OptimizeMode::ReadWrite).unwrap_err();
        assert!(err.is_lock_held());
        assert!(!stock.manager().is_optimized(CheckoutMode::Read));
        drop(outside);
    }

    #[test]
    fn test_with_optimized_closes_on_error() {
        let (_dir, _registry, stock) = setup();
        let result: StockResult<()> = stock.with_optimized(OptimizeMode::Write, |s| {
            s.tag().set("x", 1)?;
            Err(StockError::NotFound(PathBuf::from("boom")))
        });
        assert!(result.is_err());
        assert!(!stock.manager().is_optimized(CheckoutMode::Write));
        assert!(!stock.manager().writer_lock_held().unwrap());
    }

    #[test]
    fn test_refresh_repins_reader() {
        let (_dir, _registry, stock) = setup();
        stock.tag().set("v", 1).unwrap();
        stock.commit("v1").unwrap();

        let _guard = stock.optimize(OptimizeMode::Read).unwrap();
        stock.tag().set("v", 2).unwrap();
        stock.commit("v2").unwrap();

        assert_eq!(stock.tag().get("v").unwrap(), Scalar::Int(1));
        assert!(stock.refresh().unwrap());
        assert_eq!(stock.tag().get("v").unwrap(), Scalar::Int(2));
    }

    #[test]
    fn test_memory_store_failed_commit_keeps_pointer() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let stock =
            StockRoom::open_with_store(dir.path(), Arc::new(store.clone()), &SessionRegistry::new())
                .unwrap();

        stock.tag().set("a", 1).unwrap();
        let first = stock.commit("first").unwrap();

        store.reject_next_commit("disk full");
        stock.tag().set("a", 2).unwrap();
        assert!(stock.commit("second").is_err());
        assert_eq!(stock.head().unwrap(), Some(first));
        assert_eq!(stock.log().unwrap().len(), 1);
    }

    #[test]
    fn test_liberate_releases_stale_lock() {
        let (dir, registry, stock) = setup();
        let held = stock.manager().acquire_write().unwrap();
        std::mem::forget(held);

        let other = StockRoom::open(dir.path(), &registry).unwrap();
        assert!(other.tag().set("x", 1).unwrap_err().is_lock_held());
        assert!(other.liberate().unwrap());
        other.tag().set("x", 1).unwrap();
    }
}
