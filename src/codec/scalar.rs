//! Typed scalars stored as metadata strings.
//!
//! Each scalar takes two metadata entries: its string form under the
//! `value` attribute and a type tag (`int`, `float`, `str`) under `type`,
//! so an int written as `500` comes back as an int and not as a string.

use std::fmt;

use crate::codec::error::{CodecError, CodecResult};
use crate::codec::keys::{self, Category};
use crate::storage::Metadata;

const ATTR_VALUE: &str = "value";
const ATTR_TYPE: &str = "type";

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "str",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Scalar::Str(_))
    }

    /// Best-effort typing of free text: int, then finite float, then string.
    pub fn infer(text: &str) -> Self {
        if let Ok(i) = text.parse::<i64>() {
            return Scalar::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            if f.is_finite() {
                return Scalar::Float(f);
            }
        }
        Scalar::Str(text.to_string())
    }

    fn encode(&self) -> String {
        match self {
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }

    fn decode(name: &str, tag: &str, raw: &str) -> CodecResult<Self> {
        let tampered = || CodecError::Tampered {
            key: name.to_string(),
            tag: tag.to_string(),
        };
        match tag {
            "int" => raw.parse().map(Scalar::Int).map_err(|_| tampered()),
            "float" => raw.parse().map(Scalar::Float).map_err(|_| tampered()),
            "str" => Ok(Scalar::Str(raw.to_string())),
            _ => Err(tampered()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl TryFrom<serde_json::Value> for Scalar {
    type Error = CodecError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Scalar::Int(i))
                } else if n.is_u64() {
                    Err(CodecError::UnsupportedType(format!("{} does not fit in int64", n)))
                } else {
                    n.as_f64()
                        .map(Scalar::Float)
                        .ok_or_else(|| CodecError::UnsupportedType(n.to_string()))
                }
            }
            Value::String(s) => Ok(Scalar::Str(s)),
            Value::Null => Err(CodecError::UnsupportedType("null".into())),
            Value::Bool(_) => Err(CodecError::UnsupportedType("bool".into())),
            Value::Array(_) => Err(CodecError::UnsupportedType("array".into())),
            Value::Object(_) => Err(CodecError::UnsupportedType("object".into())),
        }
    }
}

/// Which scalar namespace to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// Any scalar.
    Tag,
    /// Numbers only.
    Param,
}

impl ScalarKind {
    fn category(self) -> Category {
        match self {
            ScalarKind::Tag => Category::Tag,
            ScalarKind::Param => Category::Param,
        }
    }

    fn accepts(self, value: &Scalar) -> bool {
        match self {
            ScalarKind::Tag => true,
            ScalarKind::Param => value.is_numeric(),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category().token())
    }
}

/// Typed scalar access to a metadata map.
pub struct ScalarStore;

impl ScalarStore {
    pub fn set(
        metadata: &mut Metadata,
        kind: ScalarKind,
        name: &str,
        value: &Scalar,
    ) -> CodecResult<()> {
        if !kind.accepts(value) {
            return Err(CodecError::UnsupportedType(format!(
                "{} '{}' must be a number, got {}",
                kind,
                name,
                value.type_tag()
            )));
        }
        let value_key = keys::meta_key(kind.category(), name, ATTR_VALUE)?;
        let type_key = keys::meta_key(kind.category(), name, ATTR_TYPE)?;
        metadata.set(value_key, value.encode());
        metadata.set(type_key, value.type_tag());
        Ok(())
    }

    pub fn get(metadata: &Metadata, kind: ScalarKind, name: &str) -> CodecResult<Scalar> {
        let value_key = keys::meta_key(kind.category(), name, ATTR_VALUE)?;
        let type_key = keys::meta_key(kind.category(), name, ATTR_TYPE)?;

        let raw = metadata
            .get(&value_key)
            .ok_or_else(|| CodecError::KeyNotFound(name.to_string()))?;
        let tag = metadata
            .get(&type_key)
            .ok_or_else(|| CodecError::KeyNotFound(name.to_string()))?;
        Scalar::decode(name, tag, raw)
    }

    /// Names stored under `kind`, sorted.
    pub fn keys(metadata: &Metadata, kind: ScalarKind) -> Vec<String> {
        metadata
            .keys()
            .filter_map(keys::parse_meta_key)
            .filter(|(category, _, attr)| *category == kind.category() && *attr == ATTR_VALUE)
            .map(|(_, name, _)| name.to_string())
            .collect()
    }
}
