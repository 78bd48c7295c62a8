//! Typed columns: the store's array primitive.
//!
//! A column holds arrays of one dtype keyed by [`SampleKey`]. Flat columns
//! map a key to one array; nested ("sub-sampled") columns map a key to a
//! second level of keyed arrays. Shapes are either fixed or bounded by a
//! maximum shape (`variable_shape`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Array, DType, SampleKey};

/// How samples are addressed inside a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnLayout {
    Flat,
    Nested,
}

impl ColumnLayout {
    fn as_str(&self) -> &'static str {
        match self {
            ColumnLayout::Flat => "flat",
            ColumnLayout::Nested => "nested",
        }
    }
}

/// Schema of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub dtype: DType,
    /// Exact shape, or the per-dimension maximum when `variable_shape` is set.
    pub shape: Vec<usize>,
    pub variable_shape: bool,
    pub layout: ColumnLayout,
}

impl ColumnSpec {
    /// Every sample has exactly `shape`.
    pub fn fixed(dtype: DType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            variable_shape: false,
            layout: ColumnLayout::Flat,
        }
    }

    /// Samples have the rank of `max_shape` and no dimension above it.
    pub fn variable(dtype: DType, max_shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape: max_shape,
            variable_shape: true,
            layout: ColumnLayout::Flat,
        }
    }

    /// Same spec with the nested layout.
    pub fn nested(mut self) -> Self {
        self.layout = ColumnLayout::Nested;
        self
    }

    /// Validate an array against this spec.
    pub fn check(&self, column: &str, array: &Array) -> StorageResult<()> {
        if array.dtype() != self.dtype {
            return Err(StorageError::DTypeMismatch {
                column: column.to_string(),
                expected: self.dtype,
                found: array.dtype(),
            });
        }

        if !self.variable_shape {
            if array.shape() != self.shape.as_slice() {
                return Err(StorageError::ShapeMismatch {
                    column: column.to_string(),
                    reason: format!("expected {:?}, got {:?}", self.shape, array.shape()),
                });
            }
            return Ok(());
        }

        if array.rank() != self.shape.len() {
            return Err(StorageError::ShapeMismatch {
                column: column.to_string(),
                reason: format!(
                    "expected rank {}, got rank {}",
                    self.shape.len(),
                    array.rank()
                ),
            });
        }
        for (dim, (got, max)) in array.shape().iter().zip(&self.shape).enumerate() {
            if got > max {
                return Err(StorageError::ShapeMismatch {
                    column: column.to_string(),
                    reason: format!("dimension {} is {}, maximum is {}", dim, got, max),
                });
            }
        }
        Ok(())
    }
}

/// Content stored under one key of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Value(Array),
    Nested(BTreeMap<SampleKey, Array>),
}

/// A named column with its samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    spec: ColumnSpec,
    samples: BTreeMap<SampleKey, Sample>,
}

impl Column {
    pub fn new(name: impl Into<String>, spec: ColumnSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            samples: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contains(&self, key: &SampleKey) -> bool {
        self.samples.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SampleKey> {
        self.samples.keys()
    }

    /// Read a sample of a flat column.
    pub fn get(&self, key: &SampleKey) -> StorageResult<&Array> {
        self.expect_layout(ColumnLayout::Flat)?;
        match self.samples.get(key) {
            Some(Sample::Value(array)) => Ok(array),
            _ => Err(self.sample_not_found(key)),
        }
    }

    /// Write a sample of a flat column, replacing any previous value.
    pub fn set(&mut self, key: SampleKey, array: Array) -> StorageResult<()> {
        self.expect_layout(ColumnLayout::Flat)?;
        self.spec.check(&self.name, &array)?;
        self.samples.insert(key, Sample::Value(array));
        Ok(())
    }

    /// Read a sub-sample of a nested column.
    pub fn get_nested(&self, key: &SampleKey, sub: &SampleKey) -> StorageResult<&Array> {
        self.expect_layout(ColumnLayout::Nested)?;
        match self.samples.get(key) {
            Some(Sample::Nested(subs)) => subs.get(sub).ok_or_else(|| StorageError::SampleNotFound {
                column: self.name.clone(),
                key: format!("{}/{}", key, sub),
            }),
            _ => Err(self.sample_not_found(key)),
        }
    }

    /// Write a sub-sample of a nested column.
    pub fn set_nested(
        &mut self,
        key: SampleKey,
        sub: SampleKey,
        array: Array,
    ) -> StorageResult<()> {
        self.expect_layout(ColumnLayout::Nested)?;
        self.spec.check(&self.name, &array)?;
        let entry = self
            .samples
            .entry(key)
            .or_insert_with(|| Sample::Nested(BTreeMap::new()));
        match entry {
            Sample::Nested(subs) => {
                subs.insert(sub, array);
                Ok(())
            }
            Sample::Value(_) => Err(StorageError::WrongLayout {
                column: self.name.clone(),
                expected: ColumnLayout::Nested.as_str(),
            }),
        }
    }

    /// Keys of the sub-samples stored under `key`.
    pub fn sub_keys(&self, key: &SampleKey) -> StorageResult<Vec<&SampleKey>> {
        self.expect_layout(ColumnLayout::Nested)?;
        match self.samples.get(key) {
            Some(Sample::Nested(subs)) => Ok(subs.keys().collect()),
            _ => Err(self.sample_not_found(key)),
        }
    }

    /// Remove a sample (and all its sub-samples).
    pub fn remove(&mut self, key: &SampleKey) -> StorageResult<()> {
        self.samples
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| self.sample_not_found(key))
    }

    pub(crate) fn samples(&self) -> &BTreeMap<SampleKey, Sample> {
        &self.samples
    }

    /// Insert decoded content without validation (used when loading a tree).
    pub(crate) fn insert_raw(&mut self, key: SampleKey, sample: Sample) {
        self.samples.insert(key, sample);
    }

    fn expect_layout(&self, layout: ColumnLayout) -> StorageResult<()> {
        if self.spec.layout != layout {
            return Err(StorageError::WrongLayout {
                column: self.name.clone(),
                expected: layout.as_str(),
            });
        }
        Ok(())
    }

    fn sample_not_found(&self, key: &SampleKey) -> StorageError {
        StorageError::SampleNotFound {
            column: self.name.clone(),
            key: key.to_string(),
        }
    }
}

/// All columns of a snapshot, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns(BTreeMap<String, Column>);

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> StorageResult<&Column> {
        self.0
            .get(name)
            .ok_or_else(|| StorageError::ColumnNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> StorageResult<&mut Column> {
        self.0
            .get_mut(name)
            .ok_or_else(|| StorageError::ColumnNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the column `name`, creating it with `spec` if it doesn't exist.
    ///
    /// An existing column with a different spec is an error rather than a
    /// silent reuse.
    pub fn create_if_absent(&mut self, name: &str, spec: ColumnSpec) -> StorageResult<&mut Column> {
        if let Some(existing) = self.0.get(name) {
            if existing.spec != spec {
                return Err(StorageError::ColumnSpecMismatch {
                    column: name.to_string(),
                });
            }
        }
        Ok(self
            .0
            .entry(name.to_string())
            .or_insert_with(|| Column::new(name, spec)))
    }

    pub fn remove(&mut self, name: &str) -> StorageResult<Column> {
        self.0
            .remove(name)
            .ok_or_else(|| StorageError::ColumnNotFound(name.to_string()))
    }

    pub(crate) fn insert(&mut self, column: Column) {
        self.0.insert(column.name.clone(), column);
    }
}
