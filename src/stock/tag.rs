//! Typed scalar tags and numeric params.

use crate::codec::{Scalar, ScalarKind, ScalarStore};
use crate::session::SessionManager;
use crate::stock::api::StockResult;

#[derive(Debug, Clone)]
struct Scalars {
    manager: SessionManager,
    kind: ScalarKind,
}

impl Scalars {
    fn set(&self, name: &str, value: Scalar) -> StockResult<()> {
        let session = self.manager.acquire_write()?;
        session.with_mut(|co| -> StockResult<()> {
            ScalarStore::set(co.metadata_mut()?, self.kind, name, &value)?;
            Ok(())
        })?;
        session.close()?;
        Ok(())
    }

    fn get(&self, name: &str) -> StockResult<Scalar> {
        let session = self.manager.acquire_read()?;
        let value = session.with(|co| -> StockResult<Scalar> {
            Ok(ScalarStore::get(co.metadata()?, self.kind, name)?)
        })?;
        session.close()?;
        Ok(value)
    }

    fn keys(&self) -> StockResult<Vec<String>> {
        let session = self.manager.acquire_read()?;
        let keys = session.with(|co| -> StockResult<Vec<String>> {
            Ok(ScalarStore::keys(co.metadata()?, self.kind))
        })?;
        session.close()?;
        Ok(keys)
    }
}

/// Free-form scalar tags: ints, floats and strings.
#[derive(Debug, Clone)]
pub struct TagStore(Scalars);

impl TagStore {
    pub(crate) fn new(manager: SessionManager) -> Self {
        Self(Scalars {
            manager,
            kind: ScalarKind::Tag,
        })
    }

    pub fn set(&self, name: &str, value: impl Into<Scalar>) -> StockResult<()> {
        self.0.set(name, value.into())
    }

    pub fn get(&self, name: &str) -> StockResult<Scalar> {
        self.0.get(name)
    }

    pub fn keys(&self) -> StockResult<Vec<String>> {
        self.0.keys()
    }
}

/// Numeric hyper-parameters.
#[derive(Debug, Clone)]
pub struct ParamStore(Scalars);

impl ParamStore {
    pub(crate) fn new(manager: SessionManager) -> Self {
        Self(Scalars {
            manager,
            kind: ScalarKind::Param,
        })
    }

    /// Fails with `UnsupportedType` for strings.
    pub fn set(&self, name: &str, value: impl Into<Scalar>) -> StockResult<()> {
        self.0.set(name, value.into())
    }

    pub fn get(&self, name: &str) -> StockResult<Scalar> {
        self.0.get(name)
    }

    pub fn keys(&self) -> StockResult<Vec<String>> {
        self.0.keys()
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{CodecError, Scalar};
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
    fn test_int_tag_stays_int() {
        let (_dir, stock) = setup();
        stock.tag().set("epochs", 500i64).unwrap();
        stock.commit("tag").unwrap();
        assert_eq!(stock.tag().get("epochs").unwrap(), Scalar::Int(500));
    }

    #[test]
    fn test_tags_survive_reopen() {
        let (dir, stock) = setup();
        stock.tag().set("optimizer", "adam").unwrap();
        stock.tag().set("lr", 0.001).unwrap();
        stock.commit("tags").unwrap();
        drop(stock);

        let reopened = StockRoom::open(dir.path(), &SessionRegistry::new()).unwrap();
        assert_eq!(reopened.tag().get("optimizer").unwrap(), Scalar::Str("adam".into()));
        assert_eq!(reopened.tag().get("lr").unwrap(), Scalar::Float(0.001));
        assert_eq!(reopened.tag().keys().unwrap(), vec!["lr", "optimizer"]);
    }

    #[test]
    fn test_params_are_numeric() {
        let (_dir, stock) = setup();
        let err = stock.param().set("optimizer", "adam").unwrap_err();
        assert!(matches!(err, StockError::Codec(CodecError::UnsupportedType(_))));

        stock.param().set("batch", 64i64).unwrap();
        stock.commit("params").unwrap();
        assert_eq!(stock.param().get("batch").unwrap(), Scalar::Int(64));
        assert_eq!(stock.param().keys().unwrap(), vec!["batch"]);
        assert!(stock.tag().keys().unwrap().is_empty());
    }

    #[test]
    fn test_missing_tag() {
        let (_dir, stock) = setup();
        assert!(stock.tag().get("ghost").unwrap_err().is_not_found());
    }
}
