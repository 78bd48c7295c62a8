//! stockroom - versioned storage for datasets, model weights and tags
//!
//! This crate keeps experiment artifacts in a git-backed columnar store next
//! to the code that produced them. Every commit is a git commit inside
//! `.stock/`, and the digest of the latest one is mirrored in a plain
//! `head.stock` file that the surrounding code repository can track.
//!
//! # Example
//!
//! ```no_run
//! use stockroom::codec::{LibraryInfo, TensorSource};
//! use stockroom::session::SessionRegistry;
//! use stockroom::storage::Array;
//! use stockroom::stock::StockRoom;
//!
//! let stock = StockRoom::open("./project", &SessionRegistry::new()).unwrap();
//! let weights = TensorSource::FlatTensorList(vec![Array::from_vec(vec![0.1f32, 0.2])]);
//! stock.model().save("linear", &weights, &LibraryInfo::new("torch", "2.1.0")).unwrap();
//! stock.commit("train linear").unwrap();
//! ```

pub mod codec;
pub mod session;
pub mod stock;
pub mod storage;
