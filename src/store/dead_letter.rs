//! Dead-letter log: terminal records for deliveries that exhausted their
//! retry budget or ack timeout.

use serde::{Deserialize, Serialize};

use crate::core::{Envelope, Timestamp, identity::short_uuid};

use super::lock::{LockResource, with_lock};
use super::{StoreResult, TeamStore, atomic, jsonl};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub original_envelope: Envelope,
    pub attempts: u32,
    pub last_error: String,
    pub terminated_at: Timestamp,
}

impl DeadLetter {
    pub fn new(
        original_envelope: Envelope,
        attempts: u32,
        last_error: impl Into<String>,
        terminated_at: Timestamp,
    ) -> Self {
        Self {
            id: format!("dlq_{}", short_uuid()),
            original_envelope,
            attempts,
            last_error: last_error.into(),
            terminated_at,
        }
    }
}

pub fn append(store: &TeamStore, entry: &DeadLetter) -> StoreResult<()> {
    let path = store.dead_letter_path(&entry.terminated_at.day());
    with_lock(store, LockResource::DeadLetter, || {
        atomic::append_jsonl(&path, entry)?;
        Ok(())
    })
}

/// All decodable dead letters, oldest day first.
pub fn read_all(store: &TeamStore) -> StoreResult<Vec<DeadLetter>> {
    let mut entries = Vec::new();
    for path in store.list_dead_letter_files()? {
        let outcome = jsonl::read_objects(&path)?;
        for record in outcome.records {
            if let Ok(entry) =
                serde_json::from_value::<DeadLetter>(serde_json::Value::Object(record.value))
            {
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}
