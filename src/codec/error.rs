use thiserror::Error;

use crate::codec::keys::InvalidKey;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] InvalidKey),

    #[error("{0}")]
    NotFound(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("stored value '{name}' is corrupted: {reason}")]
    Corrupted { name: String, reason: String },

    #[error("type tag '{tag}' stored for '{key}' is not valid; the metadata was edited by hand")]
    Tampered { key: String, tag: String },

    #[error("cannot save '{0}' without any parts")]
    EmptyValue(String),

    #[error("unsupported value: {0}")]
    UnsupportedType(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CodecError {
    pub(crate) fn corrupted(name: &str, reason: impl Into<String>) -> Self {
        CodecError::Corrupted {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            CodecError::NotFound(_) | CodecError::KeyNotFound(_) => true,
            CodecError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Stored data that does not decode: hand edits or a broken store.
    pub fn is_corruption(&self) -> bool {
        match self {
            CodecError::Corrupted { .. } | CodecError::Tampered { .. } => true,
            CodecError::Storage(e) => e.is_corruption(),
            _ => false,
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CodecError::NotFound("model with key m not found".into()).is_not_found());
        assert!(CodecError::Storage(StorageError::ColumnNotFound("c".into())).is_not_found());
        assert!(!CodecError::EmptyValue("m".into()).is_not_found());
        assert!(CodecError::Tampered {
            key: "k".into(),
            tag: "complex".into()
        }
        .is_corruption());
    }

    #[test]
    fn test_invalid_key_converts() {
        let err: CodecError = InvalidKey::Empty.into();
        assert_eq!(err.to_string(), "invalid key: name cannot be empty");
    }
}
