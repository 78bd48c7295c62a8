//! Session management for stockroom.
//!
//! This module owns every store checkout. Facade calls ask the
//! [`SessionManager`] for a read or write session; it hands out the shared
//! optimized session when one is open and otherwise opens a short-lived one
//! that is closed when the call's handle goes away.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SessionManager                         │
//! │   (acquire read/write, optimized scopes, commit + pointer)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   Session   │       │  Registry   │       │ HeadPointer │
//!  │(owned/borr.)│       │ (per root)  │       │ (head.stock)│
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stockroom::session::{SessionManager, SessionRegistry};
//! use stockroom::storage::CheckoutMode;
//!
//! let registry = SessionRegistry::new();
//! let manager = SessionManager::new(&registry, "/data/stock", store)?;
//!
//! manager.with_optimized(CheckoutMode::Write, |m| {
//!     let session = m.acquire_write()?;
//!     session.with_mut(|co| co.metadata_mut().map(|md| md.set("k", "v")))?;
//!     m.commit("set k")
//! })?;
//! ```

mod context;
mod error;
mod head;
mod manager;
mod registry;

pub use context::{Ownership, Session};
pub use error::{SessionError, SessionResult};
pub use head::{find_stock_root, HeadPointer, HEAD_FILE};
pub use manager::{OptimizeGuard, SessionManager};
pub use registry::SessionRegistry;
