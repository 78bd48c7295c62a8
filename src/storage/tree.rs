//!  tree operations for snapshot storage.
//!
//! in Git, a tree is a directory. a stock snapshot is laid out as:
//!
//! ```text
//! metadata.json                  string -> string map
//! columns/
//!   <hex(name)>/
//!     _spec.json                 column name and ColumnSpec
//!     i0.arr, s6b6579.arr        flat samples (int key / hex string key)
//!     s747261636b31/             nested sample
//!       i0.arr                   sub-sample
//! ```
//!
//! names are hex-encoded so that any column or key string is a valid,
//! collision-free git path component.

use std::collections::BTreeMap;
use std::path::PathBuf;

use git2::{FileMode, ObjectType, Repository, Tree};
use serde::{Deserialize, Serialize};

use crate::storage::blob::{read_blob, write_blob};
use crate::storage::column::{Column, ColumnSpec, Columns, Sample};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::snapshot::{Metadata, Snapshot};
use crate::storage::types::{SampleKey, TreeId};

const METADATA_FILE: &str = "metadata.json";
const COLUMNS_DIR: &str = "columns";
const SPEC_FILE: &str = "_spec.json";
const ARRAY_EXT: &str = ".arr";

/// on-disk form of a column's `_spec.json`
#[derive(Serialize, Deserialize)]
struct SpecJson {
    name: String,
    #[serde(flatten)]
    spec: ColumnSpec,
}

/// write a snapshot as a tree and return the root tree ID
pub(crate) fn write_snapshot(repo: &Repository, snapshot: &Snapshot) -> StorageResult<TreeId> {
    let mut root = repo.treebuilder(None)?;

    let metadata = serde_json::to_vec_pretty(&snapshot.metadata)?;
    root.insert(METADATA_FILE, repo.blob(&metadata)?, FileMode::Blob.into())?;

    let mut columns = repo.treebuilder(None)?;
    for column in snapshot.columns.iter() {
        let oid = write_column(repo, column)?;
        columns.insert(hex_encode(column.name()), oid, FileMode::Tree.into())?;
    }
    root.insert(COLUMNS_DIR, columns.write()?, FileMode::Tree.into())?;

    Ok(TreeId::new(root.write()?))
}

fn write_column(repo: &Repository, column: &Column) -> StorageResult<git2::Oid> {
    let mut builder = repo.treebuilder(None)?;

    let spec = SpecJson {
        name: column.name().to_string(),
        spec: column.spec().clone(),
    };
    let spec_bytes = serde_json::to_vec_pretty(&spec)?;
    builder.insert(SPEC_FILE, repo.blob(&spec_bytes)?, FileMode::Blob.into())?;

    for (key, sample) in column.samples() {
        match sample {
            Sample::Value(array) => {
                let file = format!("{}{}", key_entry_name(key), ARRAY_EXT);
                builder.insert(file, write_blob(repo, array)?, FileMode::Blob.into())?;
            }
            Sample::Nested(subs) => {
                let mut nested = repo.treebuilder(None)?;
                for (sub, array) in subs {
                    let file = format!("{}{}", key_entry_name(sub), ARRAY_EXT);
                    nested.insert(file, write_blob(repo, array)?, FileMode::Blob.into())?;
                }
                builder.insert(key_entry_name(key), nested.write()?, FileMode::Tree.into())?;
            }
        }
    }

    Ok(builder.write()?)
}

/// read a snapshot back from its root tree
pub(crate) fn read_snapshot(repo: &Repository, tree: &Tree<'_>) -> StorageResult<Snapshot> {
    let metadata = match tree.get_name(METADATA_FILE) {
        Some(entry) => {
            let blob = repo.find_blob(entry.id())?;
            serde_json::from_slice::<Metadata>(blob.content()).map_err(|e| {
                StorageError::CorruptedData {
                    path: PathBuf::from(METADATA_FILE),
                    reason: e.to_string(),
                }
            })?
        }
        None => Metadata::new(),
    };

    let mut columns = Columns::new();
    if let Some(entry) = tree.get_name(COLUMNS_DIR) {
        let columns_tree = repo.find_tree(entry.id())?;
        for entry in columns_tree.iter() {
            let dir = entry_name(&entry, COLUMNS_DIR)?;
            if entry.kind() != Some(ObjectType::Tree) {
                let path = format!("{}/{}", COLUMNS_DIR, dir);
                return Err(corrupted(path, "expected a column directory"));
            }
            let column_tree = repo.find_tree(entry.id())?;
            columns.insert(read_column(repo, &column_tree, dir)?);
        }
    }

    Ok(Snapshot { metadata, columns })
}

fn read_column(repo: &Repository, tree: &Tree<'_>, dir: &str) -> StorageResult<Column> {
    let base = format!("{}/{}", COLUMNS_DIR, dir);

    let spec_entry = tree
        .get_name(SPEC_FILE)
        .ok_or_else(|| corrupted(&base, "missing column spec"))?;
    let spec_blob = repo.find_blob(spec_entry.id())?;
    let spec: SpecJson = serde_json::from_slice(spec_blob.content())
        .map_err(|e| corrupted(format!("{}/{}", base, SPEC_FILE), e.to_string()))?;
    if hex_decode(dir).as_deref() != Some(spec.name.as_str()) {
        return Err(corrupted(
            &base,
            format!("directory does not match column name {:?}", spec.name),
        ));
    }

    let mut column = Column::new(spec.name, spec.spec);
    for entry in tree.iter() {
        let name = entry_name(&entry, &base)?;
        if name == SPEC_FILE {
            continue;
        }
        let path = PathBuf::from(format!("{}/{}", base, name));

        match entry.kind() {
            Some(ObjectType::Blob) => {
                let key = name
                    .strip_suffix(ARRAY_EXT)
                    .and_then(parse_key_entry_name)
                    .ok_or_else(|| corrupted(&path, "invalid sample file name"))?;
                let array = read_blob(repo, entry.id(), &path)?;
                column.insert_raw(key, Sample::Value(array));
            }
            Some(ObjectType::Tree) => {
                let key = parse_key_entry_name(name)
                    .ok_or_else(|| corrupted(&path, "invalid sample directory name"))?;
                let nested_tree = repo.find_tree(entry.id())?;
                let mut subs = BTreeMap::new();
                for sub_entry in nested_tree.iter() {
                    let sub_name = entry_name(&sub_entry, &path.to_string_lossy())?;
                    let sub_path = path.join(sub_name);
                    let sub = sub_name
                        .strip_suffix(ARRAY_EXT)
                        .and_then(parse_key_entry_name)
                        .ok_or_else(|| corrupted(&sub_path, "invalid sub-sample file name"))?;
                    subs.insert(sub, read_blob(repo, sub_entry.id(), &sub_path)?);
                }
                column.insert_raw(key, Sample::Nested(subs));
            }
            _ => return Err(corrupted(&path, "unexpected entry type")),
        }
    }

    Ok(column)
}

fn entry_name<'t>(entry: &'t git2::TreeEntry<'_>, parent: &str) -> StorageResult<&'t str> {
    entry
        .name()
        .ok_or_else(|| corrupted(parent, "entry name is not UTF-8"))
}

fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> StorageError {
    StorageError::CorruptedData {
        path: path.into(),
        reason: reason.into(),
    }
}

/// tree entry name of a sample key: `i<n>` or `s<hex>`
fn key_entry_name(key: &SampleKey) -> String {
    match key {
        SampleKey::Int(i) => format!("i{}", i),
        SampleKey::Str(s) => format!("s{}", hex_encode(s)),
    }
}

fn parse_key_entry_name(name: &str) -> Option<SampleKey> {
    if let Some(digits) = name.strip_prefix('i') {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return digits.parse().ok().map(SampleKey::Int);
    }
    name.strip_prefix('s')
        .and_then(hex_decode)
        .map(SampleKey::Str)
}

fn hex_encode(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Array, DType};
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn roundtrip(repo: &Repository, snapshot: &Snapshot) -> Snapshot {
        let tree_id = write_snapshot(repo, snapshot).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();
        read_snapshot(repo, &tree).unwrap()
    }

    #[test]
    fn test_empty_snapshot() {
        let (_dir, repo) = setup_repo();
        let back = roundtrip(&repo, &Snapshot::new());
        assert!(back.is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (_dir, repo) = setup_repo();
        let mut snapshot = Snapshot::new();
        snapshot.metadata.set("_STOCK.v1--_tag--_epoch", "i:3");

        let weights = snapshot
            .columns
            .create_if_absent(
                "_STOCK.v1--_model--_m--_float32",
                ColumnSpec::variable(DType::F32, vec![6]),
            )
            .unwrap();
        weights.set(SampleKey::from(0usize), Array::from_vec(vec![1f32, 2.0])).unwrap();
        weights.set(SampleKey::from("odd/key name"), Array::from_vec(Vec::<f32>::new())).unwrap();

        let audio = snapshot
            .columns
            .create_if_absent("audio", ColumnSpec::fixed(DType::I16, vec![2]).nested())
            .unwrap();
        audio
            .set_nested(
                SampleKey::from("t1"),
                SampleKey::from(3usize),
                Array::from_vec(vec![1i16, -1]),
            )
            .unwrap();

        let back = roundtrip(&repo, &snapshot);
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_identical_snapshots_share_tree() {
        let (_dir, repo) = setup_repo();
        let mut snapshot = Snapshot::new();
        snapshot.metadata.set("k", "v");
        let a = write_snapshot(&repo, &snapshot).unwrap();
        let b = write_snapshot(&repo, &snapshot.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_entry_names() {
        let keys = [
            SampleKey::from(0usize),
            SampleKey::from(42usize),
            SampleKey::from(""),
            SampleKey::from("a/b"),
        ];
        for key in keys {
            let name = key_entry_name(&key);
            assert!(!name.contains('/'));
            assert_eq!(parse_key_entry_name(&name), Some(key));
        }
        assert_eq!(parse_key_entry_name("ix"), None);
        assert_eq!(parse_key_entry_name("szz"), None);
        assert_eq!(parse_key_entry_name("x1"), None);
    }
}
