//! storage layer for stockroom
//!
//! this module is the versioned columnar store the rest of the crate builds
//! on. Upper layers (sessions, codecs, the stock facade) use this API and
//! never touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Checkout                            │
//! │   (read: pinned snapshot / write: staging + writer lease)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │    VersionedStore     │
//!                  └───────────────────────┘
//!                     │                 │
//!                     ▼                 ▼
//!              ┌─────────────┐   ┌─────────────┐
//!              │  GitStore   │   │ MemoryStore │
//!              └─────────────┘   └─────────────┘
//!                     │
//!        ┌────────────┼────────────┬────────────┐
//!        ▼            ▼            ▼            ▼
//!  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐
//!  │   tree   │ │   blob   │ │   refs   │ │   lock   │
//!  │(snapshot)│ │ (arrays) │ │(main/stg)│ │ (writer) │
//!  └──────────┘ └──────────┘ └──────────┘ └──────────┘
//!        │            │            │
//!        └────────────┼────────────┘
//!                     ▼
//!              ┌─────────────┐
//!              │   commit    │
//!              │  (history)  │
//!              └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use stockroom::storage::{Array, Checkout, ColumnSpec, DType, GitStore, SampleKey};
//!
//! let store = Arc::new(GitStore::open("./.stock")?);
//!
//! let mut writer = Checkout::open_write(store.clone())?;
//! writer
//!     .columns_mut()?
//!     .create_if_absent("weights", ColumnSpec::variable(DType::F32, vec![1024]))?
//!     .set(SampleKey::from(0usize), Array::from_vec(vec![0.5f32; 16]))?;
//! let digest = writer.commit("add weights")?;
//! writer.close()?;
//!
//! let reader = Checkout::open_read(store, Some(&digest))?;
//! let column = reader.columns()?.get("weights")?;
//! ```

mod blob;
mod checkout;
mod column;
mod commit;
mod error;
mod lock;
mod memory;
mod refs;
mod repository;
mod snapshot;
mod store;
mod tree;
mod types;

// Re-export public API
pub use blob::{decode_array, encode_array};
pub use checkout::{Checkout, CheckoutMode};
pub use column::{Column, ColumnLayout, ColumnSpec, Columns, Sample};
pub use commit::CommitInfo;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use repository::GitStore;
pub use snapshot::{Metadata, Snapshot};
pub use store::{VersionedStore, WriterLease};
pub use types::{element_count, Array, ArrayData, DType, Digest, GitSignature, SampleKey};
