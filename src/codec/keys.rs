//! Key derivation for the metadata map and the column namespace.
//!
//! Every key the crate writes starts with a versioned prefix followed by a
//! category token, all joined by a separator that user names may not
//! contain:
//!
//! ```text
//! _STOCK.v1--_model--_resnet--_longest        descriptor attribute
//! _STOCK.v1--_tag--_epoch--_type              scalar type tag
//! _STOCK.v1--_modelcol--_resnet--_9408--_float32   data column
//! _STOCK.v1--_shape--_resnet--_9408           shape column
//! ```
//!
//! Names containing the separator are rejected instead of escaped, so
//! distinct (category, name, attribute) triples always give distinct keys.

use std::fmt;

use crate::storage::DType;

/// Versioned prefix of every generated key.
pub const PREFIX: &str = "_STOCK.v1";
/// Separator between key components.
pub const SEP: &str = "--_";
/// Delimiter between list elements in an encoded list.
pub const LIST_DELIMITER: char = '|';

/// Namespace of a generated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Descriptor attributes of a multi-part value.
    Model,
    /// Shape column of a multi-part value.
    Shape,
    /// Data columns of a multi-part value.
    ModelColumn,
    Tag,
    Param,
    Generic,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Model,
        Category::Shape,
        Category::ModelColumn,
        Category::Tag,
        Category::Param,
        Category::Generic,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Category::Model => "model",
            Category::Shape => "shape",
            Category::ModelColumn => "modelcol",
            Category::Tag => "tag",
            Category::Param => "param",
            Category::Generic => "generic",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.token() == token)
    }
}

/// error type for names that cannot be encoded into a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidKey {
    Empty,
    ContainsSeparator(String),
    ContainsDelimiter(String),
    InvalidAttribute(String),
    Reserved(String),
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::ContainsSeparator(name) => {
                write!(f, "name '{}' contains the reserved separator '{}'", name, SEP)
            }
            Self::ContainsDelimiter(item) => write!(
                f,
                "list element '{}' contains the delimiter '{}'",
                item, LIST_DELIMITER
            ),
            Self::InvalidAttribute(attr) => {
                write!(f, "attribute '{}' must be non-empty and alphanumeric", attr)
            }
            Self::Reserved(name) => {
                write!(f, "name '{}' uses the reserved prefix '{}'", name, PREFIX)
            }
        }
    }
}

impl std::error::Error for InvalidKey {}

/// Check that a user-chosen name can be embedded in a key.
pub fn validate_name(name: &str) -> Result<(), InvalidKey> {
    if name.is_empty() {
        return Err(InvalidKey::Empty);
    }
    if name.contains(SEP) {
        return Err(InvalidKey::ContainsSeparator(name.to_string()));
    }
    Ok(())
}

/// Check a user data column name: any name outside the reserved prefix.
pub fn validate_user_column(name: &str) -> Result<(), InvalidKey> {
    if name.is_empty() {
        return Err(InvalidKey::Empty);
    }
    if name.starts_with(PREFIX) {
        return Err(InvalidKey::Reserved(name.to_string()));
    }
    Ok(())
}

fn validate_attribute(attribute: &str) -> Result<(), InvalidKey> {
    if attribute.is_empty() || !attribute.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(InvalidKey::InvalidAttribute(attribute.to_string()));
    }
    Ok(())
}

fn join(parts: &[&str]) -> String {
    let mut key = String::from(PREFIX);
    for part in parts {
        key.push_str(SEP);
        key.push_str(part);
    }
    key
}

/// Metadata key of `attribute` of `name` in `category`.
pub fn meta_key(category: Category, name: &str, attribute: &str) -> Result<String, InvalidKey> {
    validate_name(name)?;
    validate_attribute(attribute)?;
    Ok(join(&[category.token(), name, attribute]))
}

/// Column holding the flattened `dtype` parts of `name`.
pub fn model_column(name: &str, longest: usize, dtype: DType) -> Result<String, InvalidKey> {
    validate_name(name)?;
    Ok(join(&[
        Category::ModelColumn.token(),
        name,
        &longest.to_string(),
        dtype.name(),
    ]))
}

/// Column holding the original shapes of the parts of `name`.
pub fn shape_column(name: &str, longest: usize) -> Result<String, InvalidKey> {
    validate_name(name)?;
    Ok(join(&[Category::Shape.token(), name, &longest.to_string()]))
}

/// Split a metadata key back into (category, name, attribute).
///
/// Returns `None` for keys not produced by [`meta_key`].
pub fn parse_meta_key(key: &str) -> Option<(Category, &str, &str)> {
    let rest = key.strip_prefix(PREFIX)?.strip_prefix(SEP)?;
    let (token, rest) = rest.split_once(SEP)?;
    let category = Category::from_token(token)?;
    let (name, attribute) = rest.rsplit_once(SEP)?;
    if validate_name(name).is_err() || validate_attribute(attribute).is_err() {
        return None;
    }
    Some((category, name, attribute))
}

/// Encode a list of strings as one metadata value: `<count>:a|b|c`.
///
/// The count prefix keeps `[]` and `[""]` distinct.
pub fn encode_list<S: AsRef<str>>(items: &[S]) -> Result<String, InvalidKey> {
    let mut out = format!("{}:", items.len());
    for (i, item) in items.iter().enumerate() {
        let item = item.as_ref();
        if item.contains(LIST_DELIMITER) {
            return Err(InvalidKey::ContainsDelimiter(item.to_string()));
        }
        if i > 0 {
            out.push(LIST_DELIMITER);
        }
        out.push_str(item);
    }
    Ok(out)
}

/// Inverse of [`encode_list`]; `None` if `encoded` is malformed.
pub fn decode_list(encoded: &str) -> Option<Vec<String>> {
    let (count, body) = encoded.split_once(':')?;
    let count: usize = count.parse().ok()?;
    if count == 0 {
        return body.is_empty().then(Vec::new);
    }
    let items: Vec<String> = body.split(LIST_DELIMITER).map(str::to_string).collect();
    (items.len() == count).then_some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_list_roundtrip() {
        let cases: Vec<Vec<&str>> = vec![
            vec![],
            vec![""],
            vec!["conv1.weight"],
            vec!["a", "", "c"],
            vec!["", ""],
        ];
        for case in cases {
            let encoded = encode_list(&case).unwrap();
            assert_eq!(decode_list(&encoded).unwrap(), case, "encoded as {:?}", encoded);
        }
        assert_ne!(encode_list::<&str>(&[]).unwrap(), encode_list(&[""]).unwrap());
    }

    #[test]
    fn test_list_rejects_delimiter() {
        assert!(matches!(encode_list(&["a|b"]), Err(InvalidKey::ContainsDelimiter(_))));
        assert_eq!(decode_list("2:only-one"), None);
        assert_eq!(decode_list("0:junk"), None);
        assert_eq!(decode_list("no-count"), None);
    }

    #[test]
    fn test_keys_are_pairwise_distinct() {
        let names = ["m", "m-", "m--", "-_m", "model", "a_b", "tag", "x.y"];
        let attributes = ["value", "type", "library", "longest"];

        let mut seen = HashSet::new();
        for category in Category::ALL {
            for name in names {
                for attribute in attributes {
                    let key = meta_key(category, name, attribute).unwrap();
                    assert!(seen.insert(key.clone()), "duplicate key {}", key);
                    assert_eq!(parse_meta_key(&key), Some((category, name, attribute)));
                }
            }
        }
    }

    #[test]
    fn test_column_names_are_distinct() {
        let mut seen = HashSet::new();
        for name in ["m", "m2"] {
            for longest in [1usize, 12] {
                assert!(seen.insert(shape_column(name, longest).unwrap()));
                for dtype in DType::ALL {
                    assert!(seen.insert(model_column(name, longest, dtype).unwrap()));
                }
            }
        }
    }

    #[test]
    fn test_separator_in_name_is_rejected() {
        assert_eq!(
            meta_key(Category::Tag, "a--_b", "value"),
            Err(InvalidKey::ContainsSeparator("a--_b".to_string()))
        );
        assert_eq!(meta_key(Category::Tag, "", "value"), Err(InvalidKey::Empty));
        assert!(matches!(
            meta_key(Category::Tag, "a", "bad attr"),
            Err(InvalidKey::InvalidAttribute(_))
        ));
        assert!(model_column("a--_b", 3, DType::F32).is_err());
    }

    #[test]
    fn test_user_columns_cannot_use_prefix() {
        assert!(validate_user_column("images").is_ok());
        assert!(matches!(
            validate_user_column("_STOCK.v1--_shape--_m--_3"),
            Err(InvalidKey::Reserved(_))
        ));
    }

    #[test]
    fn test_parse_foreign_keys() {
        assert_eq!(parse_meta_key("user-key"), None);
        assert_eq!(parse_meta_key("_STOCK.v1--_unknown--_a--_b"), None);
    }
}
