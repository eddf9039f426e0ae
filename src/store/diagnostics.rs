//! Malformed-line diagnostics index.
//!
//! Entries are deduplicated by `(file_path, line_hash)` so re-reading the
//! same broken line across invocations does not inflate counters. The same
//! hash surfacing at a different line number counts as a new occurrence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Timestamp;

use super::jsonl::Diagnostic;
use super::lock::{LockResource, with_lock};
use super::{StoreResult, TeamStore, atomic};

pub const WARN_ENV: &str = "TEAM_CHAT_WARN_MALFORMED";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MalformedEntry {
    pub file_path: String,
    pub line_number: u64,
    pub line_hash: String,
    pub reason: String,
    pub first_seen_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub count: u64,
}

fn entry_key(diag: &Diagnostic) -> String {
    format!("{}#{}", diag.file_path, diag.line_hash)
}

/// Fold freshly observed diagnostics into the index. Returns the entries
/// that were new fingerprints this invocation.
pub fn record(store: &TeamStore, diagnostics: &[Diagnostic]) -> StoreResult<Vec<MalformedEntry>> {
    if diagnostics.is_empty() {
        return Ok(Vec::new());
    }
    let warn = std::env::var(WARN_ENV).is_ok_and(|v| v == "1");
    let path = store.malformed_index_path();

    with_lock(store, LockResource::MalformedJsonl, || {
        let mut index: BTreeMap<String, MalformedEntry> =
            atomic::read_json_or(&path, BTreeMap::new);
        let now = Timestamp::now();
        let mut fresh = Vec::new();

        for diag in diagnostics {
            let key = entry_key(diag);
            match index.get_mut(&key) {
                Some(entry) => {
                    if entry.line_number != diag.line_number {
                        entry.count += 1;
                        entry.line_number = diag.line_number;
                    }
                    entry.last_seen_at = now.clone();
                }
                None => {
                    let entry = MalformedEntry {
                        file_path: diag.file_path.clone(),
                        line_number: diag.line_number,
                        line_hash: diag.line_hash.clone(),
                        reason: diag.reason.clone(),
                        first_seen_at: now.clone(),
                        last_seen_at: now.clone(),
                        count: 1,
                    };
                    if warn {
                        eprintln!(
                            "warning: malformed record at {}:{} ({})",
                            diag.file_path, diag.line_number, diag.reason
                        );
                    }
                    index.insert(key, entry.clone());
                    fresh.push(entry);
                }
            }
        }

        atomic::write_json_atomic(&path, &index)?;
        Ok(fresh)
    })
}

pub fn load(store: &TeamStore) -> BTreeMap<String, MalformedEntry> {
    atomic::read_json_or(&store.malformed_index_path(), BTreeMap::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TeamId;

    fn diag(line_number: u64, hash: &str) -> Diagnostic {
        Diagnostic {
            file_path: "inboxes/dev.jsonl".to_string(),
            line_number,
            line_hash: hash.to_string(),
            reason: "invalid JSON".to_string(),
        }
    }

    #[test]
    fn repeated_observation_does_not_inflate() {
        let dir = tempfile::tempdir().unwrap();
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        store.ensure_layout().unwrap();

        let fresh = record(&store, &[diag(3, "abc")]).unwrap();
        assert_eq!(fresh.len(), 1);

        let fresh = record(&store, &[diag(3, "abc")]).unwrap();
        assert!(fresh.is_empty());

        let index = load(&store);
        assert_eq!(index.len(), 1);
        assert_eq!(index.values().next().unwrap().count, 1);
    }

    #[test]
    fn same_hash_new_line_counts_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        store.ensure_layout().unwrap();

        record(&store, &[diag(3, "abc")]).unwrap();
        record(&store, &[diag(9, "abc")]).unwrap();

        let index = load(&store);
        assert_eq!(index.values().next().unwrap().count, 2);
    }
}
