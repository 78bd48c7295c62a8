//! Multi-part value codec.
//!
//! A value is an ordered list of arrays (optionally named) produced by some
//! ML library. Saving flattens every part and stores it at its index in a
//! per-dtype data column sized for the longest part; the original shapes go
//! to a separate shape column; a descriptor in the metadata map records how
//! to put the parts back together.
//!
//! ```text
//! metadata  _STOCK.v1--_model--_m--_library          torch
//!           _STOCK.v1--_model--_m--_libraryVersion   2.1.0
//!           _STOCK.v1--_model--_m--_longest          6
//!           _STOCK.v1--_model--_m--_dtypes           3:float32|float32|int64
//!           _STOCK.v1--_model--_m--_numParts         3
//! columns   ..._modelcol--_m--_6--_float32   {0: [6], 1: [1]}
//!           ..._modelcol--_m--_6--_int64     {2: [5]}
//!           ..._shape--_m--_6                {0: [2 3], 1: [], 2: [5]}
//! ```

use std::fmt;

use tracing::{debug, warn};

use crate::codec::error::{CodecError, CodecResult};
use crate::codec::keys::{self, Category};
use crate::storage::{Array, ArrayData, Checkout, ColumnSpec, DType, Metadata, SampleKey};

/// Highest rank a part may have.
pub const MAX_RANK: usize = 32;

const ATTR_LIBRARY: &str = "library";
const ATTR_LIBRARY_VERSION: &str = "libraryVersion";
const ATTR_LONGEST: &str = "longest";
const ATTR_DTYPES: &str = "dtypes";
const ATTR_NUM_PARTS: &str = "numParts";
const ATTR_PART_NAMES: &str = "partNames";

/// The parts of a value, in save order.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorSource {
    /// Named parts such as a state dict.
    NamedTensorMap(Vec<(String, Array)>),
    /// Positional parts such as a list of weights.
    FlatTensorList(Vec<Array>),
}

impl TensorSource {
    pub fn len(&self) -> usize {
        match self {
            TensorSource::NamedTensorMap(parts) => parts.len(),
            TensorSource::FlatTensorList(parts) => parts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn arrays(&self) -> Vec<&Array> {
        match self {
            TensorSource::NamedTensorMap(parts) => parts.iter().map(|(_, a)| a).collect(),
            TensorSource::FlatTensorList(parts) => parts.iter().collect(),
        }
    }

    /// Part names, for named sources only.
    pub fn names(&self) -> Option<Vec<&str>> {
        match self {
            TensorSource::NamedTensorMap(parts) => {
                Some(parts.iter().map(|(n, _)| n.as_str()).collect())
            }
            TensorSource::FlatTensorList(_) => None,
        }
    }

    /// Look up a part of a named source.
    pub fn get(&self, name: &str) -> Option<&Array> {
        match self {
            TensorSource::NamedTensorMap(parts) => {
                parts.iter().find(|(n, _)| n == name).map(|(_, a)| a)
            }
            TensorSource::FlatTensorList(_) => None,
        }
    }
}

/// The library (and its version) a value was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    pub tag: String,
    pub version: String,
}

impl LibraryInfo {
    pub fn new(tag: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for LibraryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag, self.version)
    }
}

/// What the metadata map records about a saved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub library: LibraryInfo,
    /// Flattened length of the largest part.
    pub longest: usize,
    /// Element type of every part, in order.
    pub dtypes: Vec<DType>,
    pub part_names: Option<Vec<String>>,
}

impl Descriptor {
    pub fn part_count(&self) -> usize {
        self.dtypes.len()
    }

    fn write(&self, name: &str, metadata: &mut Metadata) -> CodecResult<()> {
        let key = |attr: &str| keys::meta_key(Category::Model, name, attr);
        let dtypes: Vec<&str> = self.dtypes.iter().map(|d| d.name()).collect();

        metadata.set(key(ATTR_LIBRARY)?, self.library.tag.clone());
        metadata.set(key(ATTR_LIBRARY_VERSION)?, self.library.version.clone());
        metadata.set(key(ATTR_LONGEST)?, self.longest.to_string());
        metadata.set(key(ATTR_DTYPES)?, keys::encode_list(&dtypes)?);
        metadata.set(key(ATTR_NUM_PARTS)?, self.part_count().to_string());
        match &self.part_names {
            Some(names) => metadata.set(key(ATTR_PART_NAMES)?, keys::encode_list(names)?),
            None => {
                metadata.remove(&key(ATTR_PART_NAMES)?);
            }
        }
        Ok(())
    }

    fn read(name: &str, metadata: &Metadata) -> CodecResult<Self> {
        let key = |attr: &str| keys::meta_key(Category::Model, name, attr);
        let attr = |a: &str| -> CodecResult<String> {
            metadata
                .get(&key(a)?)
                .map(str::to_string)
                .ok_or_else(|| CodecError::corrupted(name, format!("missing attribute {}", a)))
        };

        let Some(tag) = metadata.get(&key(ATTR_LIBRARY)?) else {
            return Err(CodecError::NotFound(format!("model with key {} not found", name)));
        };
        let library = LibraryInfo::new(tag, attr(ATTR_LIBRARY_VERSION)?);

        let longest = attr(ATTR_LONGEST)?
            .parse::<usize>()
            .map_err(|e| CodecError::corrupted(name, format!("bad longest: {}", e)))?;

        let dtypes = keys::decode_list(&attr(ATTR_DTYPES)?)
            .ok_or_else(|| CodecError::corrupted(name, "malformed dtype list"))?
            .iter()
            .map(|d| d.parse::<DType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CodecError::corrupted(name, e.to_string()))?;

        let num_parts = attr(ATTR_NUM_PARTS)?
            .parse::<usize>()
            .map_err(|e| CodecError::corrupted(name, format!("bad part count: {}", e)))?;
        if num_parts != dtypes.len() {
            return Err(CodecError::corrupted(
                name,
                format!("{} parts but {} dtypes", num_parts, dtypes.len()),
            ));
        }

        let part_names = match metadata.get(&key(ATTR_PART_NAMES)?) {
            Some(encoded) => {
                let names = keys::decode_list(encoded)
                    .ok_or_else(|| CodecError::corrupted(name, "malformed part name list"))?;
                if names.len() != num_parts {
                    return Err(CodecError::corrupted(
                        name,
                        format!("{} parts but {} part names", num_parts, names.len()),
                    ));
                }
                Some(names)
            }
            None => None,
        };

        Ok(Self {
            library,
            longest,
            dtypes,
            part_names,
        })
    }
}

/// Stored and current library differ at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatWarning {
    pub stored: LibraryInfo,
    pub current: LibraryInfo,
}

impl fmt::Display for CompatWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "value was saved with {} but is being loaded with {}",
            self.stored, self.current
        )
    }
}

/// Result of [`ValueCodec::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub parts: TensorSource,
    pub descriptor: Descriptor,
    pub warnings: Vec<CompatWarning>,
}

/// Saves and loads multi-part values through a checkout.
pub struct ValueCodec;

impl ValueCodec {
    /// Store `parts` under `name`, replacing any previous descriptor.
    ///
    /// Every name and shape is validated before the checkout is touched.
    pub fn save(
        checkout: &mut Checkout,
        name: &str,
        parts: &TensorSource,
        library: &LibraryInfo,
    ) -> CodecResult<Descriptor> {
        keys::validate_name(name)?;
        if parts.is_empty() {
            return Err(CodecError::EmptyValue(name.to_string()));
        }

        let arrays = parts.arrays();
        let mut shapes = Vec::with_capacity(arrays.len());
        for (i, array) in arrays.iter().enumerate() {
            if array.rank() > MAX_RANK {
                return Err(CodecError::UnsupportedType(format!(
                    "part {} has rank {}, at most {} is supported",
                    i,
                    array.rank(),
                    MAX_RANK
                )));
            }
            let shape = array
                .shape()
                .iter()
                .map(|&d| i64::try_from(d))
                .collect::<Result<Vec<i64>, _>>()
                .map_err(|_| CodecError::UnsupportedType(format!("part {} is too large", i)))?;
            shapes.push(shape);
        }

        let part_names = parts
            .names()
            .map(|names| names.into_iter().map(str::to_string).collect::<Vec<_>>());
        if let Some(names) = &part_names {
            keys::encode_list(names)?;
        }

        let descriptor = Descriptor {
            library: library.clone(),
            longest: arrays.iter().map(|a| a.len()).max().unwrap_or(0),
            dtypes: arrays.iter().map(|a| a.dtype()).collect(),
            part_names,
        };

        let shape_column = keys::shape_column(name, descriptor.longest)?;
        let columns = checkout.columns_mut()?;
        for (i, (array, shape)) in arrays.iter().zip(shapes).enumerate() {
            let data_column = keys::model_column(name, descriptor.longest, array.dtype())?;
            columns
                .create_if_absent(
                    &data_column,
                    ColumnSpec::variable(array.dtype(), vec![descriptor.longest]),
                )?
                .set(SampleKey::Int(i as u64), array.flatten())?;
            columns
                .create_if_absent(&shape_column, ColumnSpec::variable(DType::I64, vec![MAX_RANK]))?
                .set(SampleKey::Int(i as u64), Array::from_vec(shape))?;
        }

        descriptor.write(name, checkout.metadata_mut()?)?;
        debug!(
            name,
            parts = descriptor.part_count(),
            longest = descriptor.longest,
            "saved value"
        );
        Ok(descriptor)
    }

    /// Rebuild the value stored under `name`.
    ///
    /// When `current` names a different library or version than the one
    /// recorded at save time, a [`CompatWarning`] is returned and logged.
    pub fn load(
        checkout: &Checkout,
        name: &str,
        current: Option<&LibraryInfo>,
    ) -> CodecResult<Loaded> {
        keys::validate_name(name)?;
        let descriptor = Descriptor::read(name, checkout.metadata()?)?;
        let columns = checkout.columns()?;

        let shape_column = keys::shape_column(name, descriptor.longest)?;
        let shapes = columns
            .get(&shape_column)
            .map_err(|_| CodecError::corrupted(name, "shape column is missing"))?;

        let mut arrays = Vec::with_capacity(descriptor.part_count());
        for (i, dtype) in descriptor.dtypes.iter().enumerate() {
            let key = SampleKey::Int(i as u64);
            let data_column = keys::model_column(name, descriptor.longest, *dtype)?;
            let flat = columns
                .get(&data_column)
                .and_then(|c| c.get(&key))
                .map_err(|_| CodecError::corrupted(name, format!("part {} is missing", i)))?;

            let shape = match shapes.get(&key).map(|a| a.data()) {
                Ok(ArrayData::I64(dims)) => dims
                    .iter()
                    .map(|&d| usize::try_from(d))
                    .collect::<Result<Vec<usize>, _>>()
                    .map_err(|_| {
                        CodecError::corrupted(name, format!("part {} has a negative dimension", i))
                    })?,
                Ok(_) => return Err(CodecError::corrupted(name, "shape column is not int64")),
                Err(_) => {
                    return Err(CodecError::corrupted(
                        name,
                        format!("shape of part {} is missing", i),
                    ))
                }
            };

            let array = flat
                .clone()
                .reshape(shape)
                .map_err(|e| CodecError::corrupted(name, format!("part {}: {}", i, e)))?;
            arrays.push(array);
        }

        let parts = match &descriptor.part_names {
            Some(names) => {
                TensorSource::NamedTensorMap(names.iter().cloned().zip(arrays).collect())
            }
            None => TensorSource::FlatTensorList(arrays),
        };

        let mut warnings = Vec::new();
        if let Some(current) = current {
            if *current != descriptor.library {
                let warning = CompatWarning {
                    stored: descriptor.library.clone(),
                    current: current.clone(),
                };
                warn!(name, "{}", warning);
                warnings.push(warning);
            }
        }

        Ok(Loaded {
            parts,
            descriptor,
            warnings,
        })
    }

    /// Names of every stored value, sorted.
    pub fn list(checkout: &Checkout) -> CodecResult<Vec<String>> {
        let names = checkout
            .metadata()?
            .keys()
            .filter_map(keys::parse_meta_key)
            .filter(|(category, _, attr)| *category == Category::Model && *attr == ATTR_LIBRARY)
            .map(|(_, name, _)| name.to_string())
            .collect();
        Ok(names)
    }

    pub fn contains(checkout: &Checkout, name: &str) -> CodecResult<bool> {
        let key = keys::meta_key(Category::Model, name, ATTR_LIBRARY)?;
        Ok(checkout.metadata()?.contains(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, VersionedStore};
    use std::sync::Arc;

    fn writer() -> Checkout {
        let store: Arc<dyn VersionedStore> = Arc::new(MemoryStore::new());
        Checkout::open_write(store).unwrap()
    }

    fn three_parts() -> TensorSource {
        TensorSource::FlatTensorList(vec![
            Array::new(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            Array::scalar(vec![0.5f32]).unwrap(),
            Array::from_vec(vec![10i64, 20, 30, 40, 50]),
        ])
    }

    #[test]
    fn test_save_layout() {
        let mut co = writer();
        let torch = LibraryInfo::new("torch", "2.1.0");
        let descriptor = ValueCodec::save(&mut co, "m", &three_parts(), &torch).unwrap();

        assert_eq!(descriptor.longest, 6);
        assert_eq!(descriptor.dtypes, vec![DType::F32, DType::F32, DType::I64]);
        assert_eq!(descriptor.part_names, None);

        let columns = co.columns().unwrap();
        let floats = columns.get(&keys::model_column("m", 6, DType::F32).unwrap()).unwrap();
        let ints = columns.get(&keys::model_column("m", 6, DType::I64).unwrap()).unwrap();
        let shapes = columns.get(&keys::shape_column("m", 6).unwrap()).unwrap();

        assert_eq!(floats.len(), 2);
        assert_eq!(ints.len(), 1);
        assert!(ints.contains(&SampleKey::Int(2)));

        assert_eq!(shapes.get(&SampleKey::Int(0)).unwrap(), &Array::from_vec(vec![2i64, 3]));
        let scalar_shape = shapes.get(&SampleKey::Int(1)).unwrap();
        assert!(scalar_shape.is_empty());
        assert_eq!(shapes.get(&SampleKey::Int(2)).unwrap(), &Array::from_vec(vec![5i64]));

        let md = co.metadata().unwrap();
        let key = |a| keys::meta_key(Category::Model, "m", a).unwrap();
        assert_eq!(md.get(&key("library")), Some("torch"));
        assert_eq!(md.get(&key("libraryVersion")), Some("2.1.0"));
        assert_eq!(md.get(&key("numParts")), Some("3"));
        assert_eq!(md.get(&key("dtypes")), Some("3:float32|float32|int64"));
        assert!(!md.contains(&key("partNames")));
    }

    #[test]
    fn test_roundtrip_flat_list() {
        let mut co = writer();
        let torch = LibraryInfo::new("torch", "2.1.0");
        ValueCodec::save(&mut co, "m", &three_parts(), &torch).unwrap();

        let loaded = ValueCodec::load(&co, "m", Some(&torch)).unwrap();
        assert_eq!(loaded.parts, three_parts());
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_roundtrip_named_map_keeps_order() {
        let mut co = writer();
        let parts = TensorSource::NamedTensorMap(vec![
            ("fc.weight".to_string(), Array::new(vec![2, 2], vec![1.0f64, 0.0, 0.0, 1.0]).unwrap()),
            ("fc.bias".to_string(), Array::from_vec(vec![0.1f64, 0.2])),
            ("".to_string(), Array::from_vec(vec![true])),
        ]);
        ValueCodec::save(&mut co, "net", &parts, &LibraryInfo::new("jax", "0.4")).unwrap();

        let loaded = ValueCodec::load(&co, "net", None).unwrap();
        assert_eq!(loaded.parts, parts);
        assert_eq!(
            loaded.parts.names().unwrap(),
            vec!["fc.weight", "fc.bias", ""]
        );
    }

    #[test]
    fn test_version_mismatch_warns() {
        let mut co = writer();
        ValueCodec::save(&mut co, "m", &three_parts(), &LibraryInfo::new("torch", "1.13")).unwrap();

        let loaded = ValueCodec::load(&co, "m", Some(&LibraryInfo::new("torch", "2.1.0"))).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.warnings[0].stored.version, "1.13");
        assert_eq!(loaded.parts, three_parts());
    }

    #[test]
    fn test_missing_value() {
        let co = writer();
        let err = ValueCodec::load(&co, "ghost", None).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "model with key ghost not found");
    }

    #[test]
    fn test_rejects_bad_input_before_writing() {
        let mut co = writer();
        let lib = LibraryInfo::new("torch", "2.1.0");

        let empty = TensorSource::FlatTensorList(Vec::new());
        assert!(matches!(
            ValueCodec::save(&mut co, "m", &empty, &lib),
            Err(CodecError::EmptyValue(_))
        ));

        let bad_names =
            TensorSource::NamedTensorMap(vec![("a|b".to_string(), Array::from_vec(vec![1u8]))]);
        assert!(matches!(
            ValueCodec::save(&mut co, "m", &bad_names, &lib),
            Err(CodecError::InvalidKey(_))
        ));
        assert!(matches!(
            ValueCodec::save(&mut co, "a--_b", &three_parts(), &lib),
            Err(CodecError::InvalidKey(_))
        ));

        assert!(co.columns().unwrap().is_empty());
        assert!(co.metadata().unwrap().is_empty());
    }

    #[test]
    fn test_list_and_resave() {
        let mut co = writer();
        let lib = LibraryInfo::new("torch", "2.1.0");
        ValueCodec::save(&mut co, "b", &three_parts(), &lib).unwrap();
        ValueCodec::save(&mut co, "a", &three_parts(), &lib).unwrap();
        co.metadata_mut().unwrap().set("unrelated", "x");

        assert_eq!(ValueCodec::list(&co).unwrap(), vec!["a", "b"]);
        assert!(ValueCodec::contains(&co, "a").unwrap());

        let smaller = TensorSource::FlatTensorList(vec![Array::from_vec(vec![7u16, 8])]);
        ValueCodec::save(&mut co, "a", &smaller, &lib).unwrap();
        assert_eq!(ValueCodec::load(&co, "a", None).unwrap().parts, smaller);
    }

    #[test]
    fn test_tampered_descriptor() {
        let mut co = writer();
        ValueCodec::save(&mut co, "m", &three_parts(), &LibraryInfo::new("torch", "2")).unwrap();
        co.metadata_mut()
            .unwrap()
            .set(keys::meta_key(Category::Model, "m", "numParts").unwrap(), "7");

        let err = ValueCodec::load(&co, "m", None).unwrap_err();
        assert!(err.is_corruption());
    }
}
