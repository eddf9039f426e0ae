//! Sharded id -> locator indexes for messages and events.
//!
//! Shard key: lowercase hex of the first two bytes of `sha256(id)`, so each
//! lookup touches exactly one small JSON file. A `.migrated` marker inside
//! the shard directory says the legacy single-file index is no longer
//! authoritative; until it exists readers consult both and the first write
//! migrates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use super::{StoreError, StoreResult, TeamStore, atomic};

pub const MIGRATED_MARKER: &str = ".migrated";

/// Where an inbox envelope lives, plus the digest of its exact line bytes
/// (consumed by `doctor check` to detect silent tampering).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLocator {
    pub inbox: String,
    pub offset: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Where an event record lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLocator {
    pub file: String,
    pub offset: u64,
}

pub fn shard_name(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    format!("{:02x}{:02x}", digest[0], digest[1])
}

/// One hash-partitioned index. Writers must hold the owning resource lock
/// (`messages` or `events`); readers load shards without locking and rely
/// on atomic replacement.
#[derive(Clone, Debug)]
pub struct ShardedIndex {
    shards_dir: PathBuf,
    legacy_path: PathBuf,
}

impl ShardedIndex {
    pub fn messages(store: &TeamStore) -> Self {
        Self {
            shards_dir: store.message_shards_dir(),
            legacy_path: store.legacy_message_index_path(),
        }
    }

    pub fn events(store: &TeamStore) -> Self {
        Self {
            shards_dir: store.event_shards_dir(),
            legacy_path: store.legacy_event_index_path(),
        }
    }

    pub fn shards_dir(&self) -> &Path {
        &self.shards_dir
    }

    fn shard_path(&self, id: &str) -> PathBuf {
        self.shards_dir.join(format!("{}.json", shard_name(id)))
    }

    fn migrated(&self) -> bool {
        self.shards_dir.join(MIGRATED_MARKER).exists()
    }

    fn load_shard<T: DeserializeOwned>(&self, id: &str) -> BTreeMap<String, T> {
        atomic::read_json_or(&self.shard_path(id), BTreeMap::new)
    }

    fn load_legacy<T: DeserializeOwned>(&self) -> BTreeMap<String, T> {
        atomic::read_json_or(&self.legacy_path, BTreeMap::new)
    }

    pub fn has<T: DeserializeOwned>(&self, id: &str) -> bool {
        self.get::<T>(id).is_some()
    }

    pub fn get<T: DeserializeOwned>(&self, id: &str) -> Option<T> {
        let mut shard = self.load_shard::<T>(id);
        if let Some(value) = shard.remove(id) {
            return Some(value);
        }
        if !self.migrated() {
            let mut legacy = self.load_legacy::<T>();
            return legacy.remove(id);
        }
        None
    }

    /// Insert under the owning lock. Migrates the legacy file into shards
    /// on the first write after an upgrade.
    pub fn put<T: Serialize + DeserializeOwned>(&self, id: &str, value: T) -> StoreResult<()> {
        if !self.migrated() {
            self.migrate_legacy::<T>()?;
        }
        let mut shard = self.load_shard::<T>(id);
        shard.insert(id.to_string(), value);
        atomic::write_json_atomic(&self.shard_path(id), &shard)
    }

    fn migrate_legacy<T: Serialize + DeserializeOwned>(&self) -> StoreResult<()> {
        let legacy = self.load_legacy::<T>();
        if !legacy.is_empty() {
            let mut by_shard: BTreeMap<String, BTreeMap<String, T>> = BTreeMap::new();
            for (id, value) in legacy {
                by_shard
                    .entry(shard_name(&id))
                    .or_default()
                    .insert(id, value);
            }
            for (shard, map) in by_shard {
                atomic::write_json_atomic(&self.shards_dir.join(format!("{shard}.json")), &map)?;
            }
        }
        self.touch_marker(&self.shards_dir)
    }

    fn touch_marker(&self, dir: &Path) -> StoreResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let marker = dir.join(MIGRATED_MARKER);
        std::fs::write(&marker, b"").map_err(|e| StoreError::io(&marker, e))
    }

    /// Every entry across all shards (plus the legacy file pre-migration).
    pub fn scan_all<T: DeserializeOwned>(&self) -> StoreResult<BTreeMap<String, T>> {
        let mut all: BTreeMap<String, T> = BTreeMap::new();
        if !self.migrated() {
            all.extend(self.load_legacy::<T>());
        }
        if self.shards_dir.is_dir() {
            let entries = std::fs::read_dir(&self.shards_dir)
                .map_err(|e| StoreError::io(&self.shards_dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| StoreError::io(&self.shards_dir, e))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    let shard: BTreeMap<String, T> = atomic::read_json_or(&path, BTreeMap::new);
                    all.extend(shard);
                }
            }
        }
        Ok(all)
    }

    /// Replace the whole shard set with `entries` (rehydrate). New shards
    /// are written to a sibling directory first; the old directory is then
    /// removed and the new one renamed into place. A crash between the two
    /// steps is repaired by re-running rehydrate.
    pub fn replace_all<T: Serialize>(&self, entries: &BTreeMap<String, T>) -> StoreResult<()> {
        let parent = self
            .shards_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        std::fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

        let staging = parent.join(format!(
            ".{}.new.{}",
            self.shards_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;

        let mut by_shard: BTreeMap<String, BTreeMap<&str, &T>> = BTreeMap::new();
        for (id, value) in entries {
            by_shard
                .entry(shard_name(id))
                .or_default()
                .insert(id.as_str(), value);
        }
        for (shard, map) in &by_shard {
            atomic::write_json_atomic(&staging.join(format!("{shard}.json")), map)?;
        }
        self.touch_marker(&staging)?;

        if self.shards_dir.exists() {
            std::fs::remove_dir_all(&self.shards_dir)
                .map_err(|e| StoreError::io(&self.shards_dir, e))?;
        }
        std::fs::rename(&staging, &self.shards_dir)
            .map_err(|e| StoreError::io(&self.shards_dir, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TeamId;

    fn message_index() -> (tempfile::TempDir, TeamStore, ShardedIndex) {
        let dir = tempfile::tempdir().unwrap();
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        store.ensure_layout().unwrap();
        let index = ShardedIndex::messages(&store);
        (dir, store, index)
    }

    fn locator(inbox: &str) -> MessageLocator {
        MessageLocator {
            inbox: inbox.to_string(),
            offset: 0,
            digest: "d".to_string(),
            created_at: None,
        }
    }

    #[test]
    fn shard_name_is_four_hex_chars() {
        let name = shard_name("msg_42");
        assert_eq!(name.len(), 4);
        assert!(name.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, _store, index) = message_index();
        index.put("msg_1", locator("dev.jsonl")).unwrap();
        assert!(index.has::<MessageLocator>("msg_1"));
        assert!(!index.has::<MessageLocator>("msg_2"));
        let got: MessageLocator = index.get("msg_1").unwrap();
        assert_eq!(got.inbox, "dev.jsonl");
    }

    #[test]
    fn legacy_file_is_consulted_until_migration() {
        let (_dir, store, index) = message_index();
        let legacy = BTreeMap::from([("msg_old".to_string(), locator("qa.jsonl"))]);
        atomic::write_json_atomic(&store.legacy_message_index_path(), &legacy).unwrap();

        assert!(index.has::<MessageLocator>("msg_old"));

        // First write migrates: legacy entries move into shards, marker lands.
        index.put("msg_new", locator("dev.jsonl")).unwrap();
        assert!(store.message_shards_dir().join(MIGRATED_MARKER).exists());
        assert!(index.has::<MessageLocator>("msg_old"));
        assert!(index.has::<MessageLocator>("msg_new"));

        let all = index.scan_all::<MessageLocator>().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn replace_all_swaps_the_shard_set() {
        let (_dir, store, index) = message_index();
        index.put("msg_gone", locator("dev.jsonl")).unwrap();

        let fresh = BTreeMap::from([("msg_kept".to_string(), locator("qa.jsonl"))]);
        index.replace_all(&fresh).unwrap();

        assert!(!index.has::<MessageLocator>("msg_gone"));
        assert!(index.has::<MessageLocator>("msg_kept"));
        assert!(store.message_shards_dir().join(MIGRATED_MARKER).exists());

        // No staging directory left behind.
        let stray: Vec<_> = std::fs::read_dir(store.state_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".new."))
            .collect();
        assert!(stray.is_empty());
    }
}
