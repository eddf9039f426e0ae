//! Atomic JSON replacement and single-record JSONL appends.
//!
//! `write_json_atomic` gives readers atomic visibility: they see either the
//! old or the new generation, never a partial file. Nothing here forces a
//! sync to stable storage; durability across power loss is best-effort.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;

use super::{StoreError, StoreResult};

/// Encode `value` pretty-printed, write it to a sibling `.tmp.*` file and
/// rename over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".tmp.{name}.{}", uuid::Uuid::new_v4().simple()));

    let mut body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    body.push(b'\n');

    std::fs::write(&temp_path, &body).map_err(|e| StoreError::io(&temp_path, e))?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        StoreError::io(path, e)
    })
}

/// Read a JSON state file, returning `default()` when the file is absent.
/// Corrupt state files also fall back to the default: derived state is
/// rebuildable and must never wedge an operation.
pub fn read_json_or<T: serde::de::DeserializeOwned>(
    path: &Path,
    default: impl FnOnce() -> T,
) -> T {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| default()),
        Err(_) => default(),
    }
}

/// Append one compact JSON line. Returns the byte offset the line starts at
/// and the serialized line (without the trailing newline) for digesting.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> StoreResult<(u64, Vec<u8>)> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let line = serde_json::to_vec(record).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    let offset = file
        .seek(SeekFrom::End(0))
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(&line).map_err(|e| StoreError::io(path, e))?;
    file.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
    Ok((offset, line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_json_atomic(&path, &BTreeMap::from([("a", 1)])).unwrap();
        write_json_atomic(&path, &BTreeMap::from([("a", 2)])).unwrap();

        let read: BTreeMap<String, i64> = read_json_or(&path, BTreeMap::new);
        assert_eq!(read.get("a"), Some(&2));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn append_reports_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let (first, line) = append_jsonl(&path, &serde_json::json!({"id": "a"})).unwrap();
        let (second, _) = append_jsonl(&path, &serde_json::json!({"id": "b"})).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, line.len() as u64 + 1);
    }

    #[test]
    fn read_json_or_defaults_on_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let map: BTreeMap<String, i64> = read_json_or(&path, BTreeMap::new);
        assert!(map.is_empty());

        std::fs::write(&path, b"{truncated").unwrap();
        let map: BTreeMap<String, i64> = read_json_or(&path, BTreeMap::new);
        assert!(map.is_empty());
    }
}
