//! Ack index: one JSON file mapping message id to its ack record.
//!
//! Concurrent acks for the same message are idempotent - the first writer
//! wins and later writers observe the existing record without rewriting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{AgentId, MessageId, Timestamp};

use super::lock::{LockResource, with_lock};
use super::{StoreResult, TeamStore, atomic};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckRecord {
    pub message_id: MessageId,
    pub acked_by: AgentId,
    pub acked_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Lockless read; atomic replacement guarantees a complete generation.
pub fn load(store: &TeamStore) -> BTreeMap<String, AckRecord> {
    atomic::read_json_or(&store.ack_index_path(), BTreeMap::new)
}

pub fn get(store: &TeamStore, message_id: &MessageId) -> Option<AckRecord> {
    load(store).remove(message_id.as_str())
}

/// Record an ack. Returns false (success) when the message was already
/// acked, leaving the existing record untouched.
pub fn record(store: &TeamStore, ack: AckRecord) -> StoreResult<bool> {
    with_lock(store, LockResource::Acks, || {
        let path = store.ack_index_path();
        let mut index: BTreeMap<String, AckRecord> = atomic::read_json_or(&path, BTreeMap::new);
        if index.contains_key(ack.message_id.as_str()) {
            return Ok(false);
        }
        index.insert(ack.message_id.as_str().to_string(), ack);
        atomic::write_json_atomic(&path, &index)?;
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TeamId;

    fn ack(id: &str) -> AckRecord {
        AckRecord {
            message_id: MessageId::parse(id).unwrap(),
            acked_by: AgentId::parse("dev").unwrap(),
            acked_at: Timestamp::parse("2025-01-01T00:00:00Z").unwrap(),
            trace_id: None,
        }
    }

    #[test]
    fn first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        store.ensure_layout().unwrap();

        assert!(record(&store, ack("msg_1")).unwrap());

        let mut second = ack("msg_1");
        second.acked_by = AgentId::parse("qa").unwrap();
        assert!(!record(&store, second).unwrap());

        let kept = get(&store, &MessageId::parse("msg_1").unwrap()).unwrap();
        assert_eq!(kept.acked_by.as_str(), "dev");
    }
}
