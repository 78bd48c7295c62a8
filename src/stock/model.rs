//! Model weights saved as multi-part values.

use crate::codec::{Descriptor, LibraryInfo, Loaded, TensorSource, ValueCodec};
use crate::session::SessionManager;
use crate::stock::api::StockResult;

#[derive(Debug, Clone)]
pub struct ModelStore {
    manager: SessionManager,
}

impl ModelStore {
    pub(crate) fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    /// Stage `parts` under `name`. Visible to loads after the next commit.
    pub fn save(
        &self,
        name: &str,
        parts: &TensorSource,
        library: &LibraryInfo,
    ) -> StockResult<Descriptor> {
        let session = self.manager.acquire_write()?;
        let descriptor = session.with_mut(|co| ValueCodec::save(co, name, parts, library))?;
        session.close()?;
        Ok(descriptor)
    }

    /// Load `name` from the head commit.
    ///
    /// `current` is the library the caller will use the parts with; a
    /// mismatch with the stored library yields warnings, not an error.
    pub fn load(&self, name: &str, current: Option<&LibraryInfo>) -> StockResult<Loaded> {
        let session = self.manager.acquire_read()?;
        let loaded = session.with(|co| ValueCodec::load(co, name, current))?;
        session.close()?;
        Ok(loaded)
    }

    pub fn keys(&self) -> StockResult<Vec<String>> {
        let session = self.manager.acquire_read()?;
        let names = session.with(ValueCodec::list)?;
        session.close()?;
        Ok(names)
    }

    pub fn contains(&self, name: &str) -> StockResult<bool> {
        let session = self.manager.acquire_read()?;
        let found = session.with(|co| ValueCodec::contains(co, name))?;
        session.close()?;
        Ok(found)
    }
}
