//! Untyped string metadata.

use crate::codec::keys::{self, Category};
use crate::codec::CodecError;
use crate::session::SessionManager;
use crate::stock::api::StockResult;

const ATTR_VALUE: &str = "value";

/// Plain string values kept next to tags and params.
///
/// Values come back exactly as written; nothing is parsed.
#[derive(Debug, Clone)]
pub struct GenericStore {
    manager: SessionManager,
}

impl GenericStore {
    pub(crate) fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> StockResult<()> {
        let key = keys::meta_key(Category::Generic, name, ATTR_VALUE).map_err(CodecError::from)?;
        let value = value.into();

        let session = self.manager.acquire_write()?;
        session.with_mut(|co| -> StockResult<()> {
            co.metadata_mut()?.set(key, value);
            Ok(())
        })?;
        session.close()?;
        Ok(())
    }

    /// Fails with `KeyNotFound` if `name` was never committed.
    pub fn get(&self, name: &str) -> StockResult<String> {
        let key = keys::meta_key(Category::Generic, name, ATTR_VALUE).map_err(CodecError::from)?;

        let session = self.manager.acquire_read()?;
        let value = session.with(|co| -> StockResult<String> {
            let value = co
                .metadata()?
                .get(&key)
                .ok_or_else(|| CodecError::KeyNotFound(name.to_string()))?;
            Ok(value.to_string())
        })?;
        session.close()?;
        Ok(value)
    }

    /// Names of stored values, sorted.
    pub fn keys(&self) -> StockResult<Vec<String>> {
        let session = self.manager.acquire_read()?;
        let names = session.with(|co| -> StockResult<Vec<String>> {
            Ok(co
                .metadata()?
                .keys()
                .filter_map(keys::parse_meta_key)
                .filter(|(category, _, attr)| *category == Category::Generic && *attr == ATTR_VALUE)
                .map(|(_, name, _)| name.to_string())
                .collect())
        })?;
        session.close()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{CodecError, InvalidKey, Scalar};
    use crate::session::SessionRegistry;
    use crate::stock::{InitOptions, StockError, StockRoom};
    use tempfile::TempDir;

    fn setup() -> (TempDir, StockRoom) {
        let dir = TempDir::new().unwrap();
        let stock =
            StockRoom::init(dir.path(), InitOptions::new(), &SessionRegistry::new()).unwrap();
        (dir, stock)
    }

    #[test]
    fn test_value_visible_after_commit() {
        let (_dir, stock) = setup();
        let generic = stock.generic();
        generic.set("key1", "value1").unwrap();
        assert!(generic.get("key1").unwrap_err().is_not_found());

        stock.commit("data saved").unwrap();
        assert_eq!(generic.get("key1").unwrap(), "value1");
    }

    #[test]
    fn test_numeric_text_stays_text() {
        let (_dir, stock) = setup();
        stock.generic().set("threshold", "0.01").unwrap();
        stock.tag().set("threshold", 0.5).unwrap();
        stock.commit("both").unwrap();

        assert_eq!(stock.generic().get("threshold").unwrap(), "0.01");
        assert_eq!(stock.tag().get("threshold").unwrap(), Scalar::Float(0.5));
        assert_eq!(stock.generic().keys().unwrap(), vec!["threshold"]);
    }

    #[test]
    fn test_missing_and_invalid_names() {
        let (_dir, stock) = setup();
        let err = stock.generic().get("ghost").unwrap_err();
        assert!(matches!(err, StockError::Codec(CodecError::KeyNotFound(ref n)) if n == "ghost"));

        let err = stock.generic().set("a--_b", "x").unwrap_err();
        assert!(matches!(
            err,
            StockError::Codec(CodecError::InvalidKey(InvalidKey::ContainsSeparator(_)))
        ));
    }
}
