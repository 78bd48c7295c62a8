//! Encoding of stockroom values onto the columnar store.
//!
//! The store only knows about a string metadata map and typed columns. This
//! module maps everything else onto them:
//!
//! - [`keys`]: collision-free key and column names plus a list codec
//! - [`value`]: multi-part values (model weights) as data, shape columns
//!   and a metadata descriptor
//! - [`scalar`]: typed tag and param scalars as a value/type pair of
//!   metadata entries

mod error;
pub mod keys;
mod scalar;
mod value;

pub use error::{CodecError, CodecResult};
pub use keys::{Category, InvalidKey};
pub use scalar::{Scalar, ScalarKind, ScalarStore};
pub use value::{CompatWarning, Descriptor, LibraryInfo, Loaded, TensorSource, ValueCodec, MAX_RANK};
