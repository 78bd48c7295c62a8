//! User-facing stock API.
//!
//! [`StockRoom`] is the entry point; it hands out one facade per kind of
//! artifact. Every facade call borrows a session from the shared
//! [`SessionManager`](crate::session::SessionManager): writes are staged
//! until [`StockRoom::commit`], reads see the commit recorded in
//! `head.stock`.
//!
//! ```no_run
//! use stockroom::session::SessionRegistry;
//! use stockroom::stock::{InitOptions, StockRoom};
//!
//! let registry = SessionRegistry::new();
//! let stock = StockRoom::init("./project", InitOptions::new(), &registry)?;
//! stock.tag().set("epochs", 500i64)?;
//! stock.commit("first run")?;
//! # Ok::<(), stockroom::stock::StockError>(())
//! ```

mod api;
mod data;
mod generic;
mod model;
mod tag;

pub use api::{
    InitOptions, OptimizeMode, StockConfig, StockError, StockGuard, StockResult, StockRoom,
    STORE_DIR,
};
pub use data::DataStore;
pub use generic::GenericStore;
pub use model::ModelStore;
pub use tag::{ParamStore, TagStore};
