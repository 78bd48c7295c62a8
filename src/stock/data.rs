//! Dataset columns.
//!
//! Writes go to the staging area through a write session and become
//! visible to readers after [`StockRoom::commit`](crate::stock::StockRoom::commit).
//! Reads come from a session pinned to the head pointer.

use crate::codec::keys;
use crate::session::SessionManager;
use crate::stock::api::StockResult;
use crate::storage::{Array, Checkout, ColumnSpec, SampleKey};

#[derive(Debug, Clone)]
pub struct DataStore {
    manager: SessionManager,
}

impl DataStore {
    pub(crate) fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    fn write<T>(&self, f: impl FnOnce(&mut Checkout) -> StockResult<T>) -> StockResult<T> {
        let session = self.manager.acquire_write()?;
        let value = session.with_mut(f)?;
        session.close()?;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&Checkout) -> StockResult<T>) -> StockResult<T> {
        let session = self.manager.acquire_read()?;
        let value = session.with(f)?;
        session.close()?;
        Ok(value)
    }

    /// Create a column; a no-op if it already exists with the same spec.
    pub fn create_column(&self, name: &str, spec: ColumnSpec) -> StockResult<()> {
        keys::validate_user_column(name).map_err(crate::codec::CodecError::from)?;
        self.write(|co| {
            co.columns_mut()?.create_if_absent(name, spec)?;
            Ok(())
        })
    }

    pub fn set(&self, column: &str, key: impl Into<SampleKey>, array: Array) -> StockResult<()> {
        let key = key.into();
        self.write(|co| Ok(co.columns_mut()?.get_mut(column)?.set(key, array)?))
    }

    pub fn get(&self, column: &str, key: impl Into<SampleKey>) -> StockResult<Array> {
        let key = key.into();
        self.read(|co| Ok(co.columns()?.get(column)?.get(&key)?.clone()))
    }

    pub fn set_nested(
        &self,
        column: &str,
        key: impl Into<SampleKey>,
        sub: impl Into<SampleKey>,
        array: Array,
    ) -> StockResult<()> {
        let (key, sub) = (key.into(), sub.into());
        self.write(|co| Ok(co.columns_mut()?.get_mut(column)?.set_nested(key, sub, array)?))
    }

    pub fn get_nested(
        &self,
        column: &str,
        key: impl Into<SampleKey>,
        sub: impl Into<SampleKey>,
    ) -> StockResult<Array> {
        let (key, sub) = (key.into(), sub.into());
        self.read(|co| Ok(co.columns()?.get(column)?.get_nested(&key, &sub)?.clone()))
    }

    pub fn remove(&self, column: &str, key: impl Into<SampleKey>) -> StockResult<()> {
        let key = key.into();
        self.write(|co| Ok(co.columns_mut()?.get_mut(column)?.remove(&key)?))
    }

    /// User columns of the head commit; internal model columns are hidden.
    pub fn columns(&self) -> StockResult<Vec<String>> {
        self.read(|co| {
            Ok(co
                .columns()?
                .names()
                .filter(|name| !name.starts_with(keys::PREFIX))
                .map(str::to_string)
                .collect())
        })
    }

    pub fn keys(&self, column: &str) -> StockResult<Vec<SampleKey>> {
        self.read(|co| Ok(co.columns()?.get(column)?.keys().cloned().collect()))
    }

    pub fn sub_keys(&self, column: &str, key: impl Into<SampleKey>) -> StockResult<Vec<SampleKey>> {
        let key = key.into();
        self.read(|co| {
            Ok(co
                .columns()?
                .get(column)?
                .sub_keys(&key)?
                .into_iter()
                .cloned()
                .collect())
        })
    }

    pub fn spec(&self, column: &str) -> StockResult<ColumnSpec> {
        self.read(|co| Ok(co.columns()?.get(column)?.spec().clone()))
    }
}
