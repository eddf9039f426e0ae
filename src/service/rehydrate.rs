//! Deterministic rebuild of all derived state from the append-only logs.
//!
//! Inbox and event files are the source of truth; everything under
//! `state/` and `tasks/` is rewritten from them. The whole rebuild runs
//! under the `state-rehydrate` lock; snapshot writes use atomic replace
//! directly because nesting the lower-ranked `task-snapshots` lock here
//! would invert the mandated order, and the rehydrate lock already
//! excludes cooperating writers.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::core::{AgentId, Envelope, EventKind, EventRecord, MessageId};
use crate::store::acks::AckRecord;
use crate::store::index::{EventLocator, MessageLocator, ShardedIndex};
use crate::store::jsonl::Diagnostic;
use crate::store::lock::{LockResource, with_lock};
use crate::store::snapshot::{self, TaskSnapshot};
use crate::store::{StoreResult, TeamStore, atomic, diagnostics, jsonl};

#[derive(Clone, Debug, Default, Serialize)]
pub struct RehydrateReport {
    pub message_count: usize,
    pub event_count: usize,
    pub ack_count: usize,
    pub task_count: usize,
    pub malformed_count: usize,
}

pub fn rehydrate(store: &TeamStore) -> StoreResult<RehydrateReport> {
    with_lock(store, LockResource::StateRehydrate, || rebuild(store))
}

fn rebuild(store: &TeamStore) -> StoreResult<RehydrateReport> {
    let mut message_index: BTreeMap<String, MessageLocator> = BTreeMap::new();
    let mut event_index: BTreeMap<String, EventLocator> = BTreeMap::new();
    let mut ack_index: BTreeMap<String, AckRecord> = BTreeMap::new();
    let mut task_messages: Vec<Envelope> = Vec::new();
    let mut all_diagnostics: Vec<Diagnostic> = Vec::new();

    for (_agent, path) in store.list_inboxes()? {
        let inbox_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outcome = jsonl::read_objects(&path)?;
        all_diagnostics.extend(outcome.diagnostics);

        for record in outcome.records {
            let Some(id) = record.value.get("id").and_then(Value::as_str) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            message_index.insert(
                id.to_string(),
                MessageLocator {
                    inbox: inbox_name.clone(),
                    offset: record.offset,
                    digest: record.digest.clone(),
                    created_at: record
                        .value
                        .get("created_at")
                        .and_then(Value::as_str)
                        .map(String::from),
                },
            );
            if let Ok(envelope) =
                serde_json::from_value::<Envelope>(Value::Object(record.value))
                && snapshot::applicable_task(&envelope).is_some()
            {
                task_messages.push(envelope);
            }
        }
    }

    for path in store.list_event_files()? {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outcome = jsonl::read_objects(&path)?;
        all_diagnostics.extend(outcome.diagnostics);

        for record in outcome.records {
            let Some(id) = record.value.get("id").and_then(Value::as_str) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            event_index.insert(
                id.to_string(),
                EventLocator {
                    file: file_name.clone(),
                    offset: record.offset,
                },
            );

            let Ok(event) = serde_json::from_value::<EventRecord>(Value::Object(record.value))
            else {
                continue;
            };
            if event.kind == EventKind::Acked
                && let (Some(subject), Some(acked_by)) =
                    (event.subject_id.as_deref(), event.attr_str("acked_by"))
                && let (Ok(message_id), Ok(agent)) =
                    (MessageId::parse(subject), AgentId::parse(acked_by))
            {
                ack_index.insert(
                    subject.to_string(),
                    AckRecord {
                        message_id,
                        acked_by: agent,
                        acked_at: event.ts.clone(),
                        trace_id: event.trace_id.clone(),
                    },
                );
            }
        }
    }

    // Replay task messages in (created_at, id) order into fresh snapshots.
    task_messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    let mut snapshots: BTreeMap<String, TaskSnapshot> = BTreeMap::new();
    for envelope in &task_messages {
        let Some(task_id) = snapshot::applicable_task(envelope) else {
            continue;
        };
        let existing = snapshots.remove(task_id.as_str());
        let (merged, _) = snapshot::merge(task_id.clone(), existing, envelope);
        snapshots.insert(task_id.as_str().to_string(), merged);
    }

    ShardedIndex::messages(store).replace_all(&message_index)?;
    ShardedIndex::events(store).replace_all(&event_index)?;
    atomic::write_json_atomic(&store.ack_index_path(), &ack_index)?;

    let keep: BTreeSet<&str> = snapshots.keys().map(String::as_str).collect();
    for path in store.list_task_files()? {
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !keep.contains(stem.as_str()) {
            std::fs::remove_file(&path)
                .map_err(|e| crate::store::StoreError::io(&path, e))?;
        }
    }
    for snapshot in snapshots.values() {
        atomic::write_json_atomic(&store.task_path(&snapshot.task_id), snapshot)?;
    }

    let malformed_count = all_diagnostics.len();
    diagnostics::record(store, &all_diagnostics)?;

    Ok(RehydrateReport {
        message_count: message_index.len(),
        event_count: event_index.len(),
        ack_count: ack_index.len(),
        task_count: snapshots.len(),
        malformed_count,
    })
}
