//! Core value types of the storage layer: digests, dtypes, typed arrays and
//! sample keys, plus the type-safe wrappers around git object ids.

use std::fmt;
use std::str::FromStr;

use git2::Oid;
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};

/// Content-derived identifier of a commit in the store.
///
/// Digests are opaque to everything above the storage layer. The git store
/// uses the hex commit id, the memory store a lowercase ULID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    /// Validate and wrap a digest string.
    pub fn new(value: impl Into<String>) -> StorageResult<Self> {
        let value = value.into();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::InvalidDigest(value));
        }
        Ok(Self(value))
    }

    /// Parse the content of a head file. Surrounding whitespace is ignored and
    /// an empty string means "no commits yet".
    pub fn parse_optional(value: &str) -> StorageResult<Option<Self>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Self::new(trimmed).map(Some)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(10);
        &self.0[..end]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Git commit identifier. Only the git backend sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CommitId(Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    pub(crate) fn from_digest(digest: &Digest) -> StorageResult<Self> {
        Oid::from_str(digest.as_str())
            .map(CommitId)
            .map_err(|_| StorageError::CommitNotFound(digest.to_string()))
    }

    pub(crate) fn to_digest(self) -> Digest {
        Digest(self.0.to_string())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TreeId(Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

/// Element type of an array or column.
///
/// Names follow numpy (`float32`, `int64`, ...) since they end up verbatim in
/// column names and descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "uint32")]
    U32,
    #[serde(rename = "uint64")]
    U64,
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int64")]
    I64,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
    #[serde(rename = "str")]
    Str,
}

impl DType {
    pub const ALL: [DType; 12] = [
        DType::Bool,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::F32,
        DType::F64,
        DType::Str,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::Str => "str",
        }
    }

    /// Stable one-byte tag used by the array blob format.
    pub(crate) fn code(&self) -> u8 {
        match self {
            DType::Bool => 0,
            DType::U8 => 1,
            DType::U16 => 2,
            DType::U32 => 3,
            DType::U64 => 4,
            DType::I8 => 5,
            DType::I16 => 6,
            DType::I32 => 7,
            DType::I64 => 8,
            DType::F32 => 9,
            DType::F64 => 10,
            DType::Str => 11,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.code() == code)
    }

    /// Width in bytes of one element, `None` for strings.
    pub fn item_size(&self) -> Option<usize> {
        match self {
            DType::Bool | DType::U8 | DType::I8 => Some(1),
            DType::U16 | DType::I16 => Some(2),
            DType::U32 | DType::I32 | DType::F32 => Some(4),
            DType::U64 | DType::I64 | DType::F64 => Some(8),
            DType::Str => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.name() == s)
            .ok_or_else(|| StorageError::InvalidArray(format!("unknown dtype '{}'", s)))
    }
}

/// Typed flat element buffer of an [`Array`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

macro_rules! with_buffer {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($v) => $body,
            ArrayData::U8($v) => $body,
            ArrayData::U16($v) => $body,
            ArrayData::U32($v) => $body,
            ArrayData::U64($v) => $body,
            ArrayData::I8($v) => $body,
            ArrayData::I16($v) => $body,
            ArrayData::I32($v) => $body,
            ArrayData::I64($v) => $body,
            ArrayData::F32($v) => $body,
            ArrayData::F64($v) => $body,
            ArrayData::Str($v) => $body,
        }
    };
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for ArrayData {
                fn from(values: Vec<$ty>) -> Self {
                    ArrayData::$variant(values)
                }
            }
        )*
    };
}

impl_from_vec! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl ArrayData {
    /// An empty buffer of the given dtype.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Bool => ArrayData::Bool(Vec::new()),
            DType::U8 => ArrayData::U8(Vec::new()),
            DType::U16 => ArrayData::U16(Vec::new()),
            DType::U32 => ArrayData::U32(Vec::new()),
            DType::U64 => ArrayData::U64(Vec::new()),
            DType::I8 => ArrayData::I8(Vec::new()),
            DType::I16 => ArrayData::I16(Vec::new()),
            DType::I32 => ArrayData::I32(Vec::new()),
            DType::I64 => ArrayData::I64(Vec::new()),
            DType::F32 => ArrayData::F32(Vec::new()),
            DType::F64 => ArrayData::F64(Vec::new()),
            DType::Str => ArrayData::Str(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::U8(_) => DType::U8,
            ArrayData::U16(_) => DType::U16,
            ArrayData::U32(_) => DType::U32,
            ArrayData::U64(_) => DType::U64,
            ArrayData::I8(_) => DType::I8,
            ArrayData::I16(_) => DType::I16,
            ArrayData::I32(_) => DType::I32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
            ArrayData::Str(_) => DType::Str,
        }
    }

    pub fn len(&self) -> usize {
        with_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of elements described by a shape. The empty shape is a scalar.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// An n-dimensional typed array stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    data: ArrayData,
}

impl Array {
    /// Create an array, checking that the buffer matches the shape.
    pub fn new(shape: Vec<usize>, data: impl Into<ArrayData>) -> StorageResult<Self> {
        let data = data.into();
        let expected = element_count(&shape);
        if expected != data.len() {
            return Err(StorageError::InvalidArray(format!(
                "shape {:?} needs {} elements, buffer has {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over the whole buffer.
    pub fn from_vec(data: impl Into<ArrayData>) -> Self {
        let data = data.into();
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Rank-0 array holding exactly one element.
    pub fn scalar(data: impl Into<ArrayData>) -> StorageResult<Self> {
        Self::new(Vec::new(), data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// A one-dimensional copy of this array.
    pub fn flatten(&self) -> Array {
        Array::from_vec(self.data.clone())
    }

    /// Reinterpret the buffer under a new shape with the same element count.
    pub fn reshape(self, shape: Vec<usize>) -> StorageResult<Array> {
        Array::new(shape, self.data)
    }
}

/// Key of one entry in a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleKey {
    Int(u64),
    Str(String),
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKey::Int(i) => write!(f, "{}", i),
            SampleKey::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for SampleKey {
    fn from(value: u64) -> Self {
        SampleKey::Int(value)
    }
}

impl From<usize> for SampleKey {
    fn from(value: usize) -> Self {
        SampleKey::Int(value as u64)
    }
}

impl From<&str> for SampleKey {
    fn from(value: &str) -> Self {
        SampleKey::Str(value.to_string())
    }
}

impl From<String> for SampleKey {
    fn from(value: String) -> Self {
        SampleKey::Str(value)
    }
}

/// Author/committer info recorded on commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Signature used when the repository has no configured user.
    pub fn stockroom() -> Self {
        Self::new("stockroom", "stockroom@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::stockroom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_validation() {
        assert!(Digest::new("a1b2c3").is_ok());
        assert!(Digest::new("").is_err());
        assert!(Digest::new("abc def").is_err());
        assert!(Digest::new("../etc").is_err());
    }

    #[test]
    fn test_digest_parse_optional() {
        assert_eq!(Digest::parse_optional("").unwrap(), None);
        assert_eq!(Digest::parse_optional("  \n").unwrap(), None);
        let digest = Digest::parse_optional("abc123\n").unwrap().unwrap();
        assert_eq!(digest.as_str(), "abc123");
    }

    #[test]
    fn test_dtype_names_roundtrip() {
        for dtype in DType::ALL {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
            assert_eq!(DType::from_code(dtype.code()), Some(dtype));
        }
        assert!("complex64".parse::<DType>().is_err());
    }

    #[test]
    fn test_array_shape_checks() {
        assert!(Array::new(vec![2, 3], vec![0f32; 6]).is_ok());
        assert!(Array::new(vec![2, 3], vec![0f32; 5]).is_err());

        let scalar = Array::scalar(vec![7i64]).unwrap();
        assert_eq!(scalar.rank(), 0);
        assert_eq!(scalar.len(), 1);

        // a zero dimension is not the same thing as a scalar
        let empty = Array::new(vec![0], Vec::<i64>::new()).unwrap();
        assert_eq!(empty.shape(), &[0]);
        assert!(Array::scalar(Vec::<i64>::new()).is_err());
    }

    #[test]
    fn test_flatten_and_reshape() {
        let array = Array::new(vec![2, 2], vec![1u8, 2, 3, 4]).unwrap();
        let flat = array.flatten();
        assert_eq!(flat.shape(), &[4]);
        let back = flat.reshape(vec![2, 2]).unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn test_sample_key_ordering() {
        let mut keys = vec![SampleKey::from("b"), SampleKey::from(2usize), SampleKey::from("a")];
        keys.sort();
        assert_eq!(keys[0], SampleKey::Int(2));
        assert_eq!(keys[1].to_string(), "a");
    }
}
