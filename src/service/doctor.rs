//! Consistency report over one team's tree.
//!
//! Doctor cross-checks the append-only logs against the derived indexes
//! (including the stored envelope digests), the ack index against known
//! messages, and the snapshots against their metadata. Apart from folding
//! observed malformed lines into the diagnostics index it writes nothing;
//! every finding is repairable by `rehydrate`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::store::index::{EventLocator, MessageLocator, ShardedIndex};
use crate::store::jsonl::Diagnostic;
use crate::store::{StoreResult, TeamStore, acks, diagnostics, jsonl, snapshot};

#[derive(Clone, Debug, Default, Serialize)]
pub struct DoctorReport {
    pub ok: bool,
    pub issues: Vec<String>,
    pub message_count: usize,
    pub event_count: usize,
    pub ack_count: usize,
    pub task_count: usize,
    pub malformed_count: usize,
}

pub fn check(store: &TeamStore) -> StoreResult<DoctorReport> {
    let mut report = DoctorReport::default();
    let mut observed: Vec<Diagnostic> = Vec::new();

    let message_index: BTreeMap<String, MessageLocator> =
        ShardedIndex::messages(store).scan_all()?;
    let mut log_digests: BTreeMap<String, String> = BTreeMap::new();

    for (_agent, path) in store.list_inboxes()? {
        let inbox_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outcome = jsonl::read_objects(&path)?;
        report.malformed_count += outcome.diagnostics.len();
        observed.extend(outcome.diagnostics);

        for record in outcome.records {
            report.message_count += 1;
            let Some(id) = record.value.get("id").and_then(Value::as_str) else {
                report.issues.push(format!(
                    "{inbox_name}:{} has a record without an id",
                    record.line_number
                ));
                continue;
            };
            log_digests.insert(id.to_string(), record.digest.clone());
            match message_index.get(id) {
                None => report
                    .issues
                    .push(format!("message `{id}` is not indexed (run rehydrate)")),
                Some(locator) => {
                    if locator.inbox != inbox_name {
                        report.issues.push(format!(
                            "message `{id}` indexed under `{}` but stored in `{inbox_name}`",
                            locator.inbox
                        ));
                    } else if locator.digest != record.digest {
                        report.issues.push(format!(
                            "message `{id}` digest mismatch: log line differs from index"
                        ));
                    }
                }
            }
        }
    }

    for id in message_index.keys() {
        if !log_digests.contains_key(id) {
            report
                .issues
                .push(format!("index entry `{id}` has no inbox record"));
        }
    }

    let event_index: BTreeMap<String, EventLocator> = ShardedIndex::events(store).scan_all()?;
    let mut event_ids: BTreeSet<String> = BTreeSet::new();
    for path in store.list_event_files()? {
        let outcome = jsonl::read_objects(&path)?;
        report.malformed_count += outcome.diagnostics.len();
        observed.extend(outcome.diagnostics);
        for record in outcome.records {
            report.event_count += 1;
            if let Some(id) = record.value.get("id").and_then(Value::as_str) {
                event_ids.insert(id.to_string());
                if !event_index.contains_key(id) {
                    report
                        .issues
                        .push(format!("event `{id}` is not indexed (run rehydrate)"));
                }
            }
        }
    }
    for id in event_index.keys() {
        if !event_ids.contains(id) {
            report
                .issues
                .push(format!("event index entry `{id}` has no log record"));
        }
    }

    let ack_index = acks::load(store);
    report.ack_count = ack_index.len();
    for id in ack_index.keys() {
        if !log_digests.contains_key(id) {
            report
                .issues
                .push(format!("ack for `{id}` references an unknown message"));
        }
    }

    let snapshots = snapshot::read_all(store)?;
    report.task_count = snapshots.len();
    for snap in &snapshots {
        if !snap.last_message_id.is_empty() && !log_digests.contains_key(&snap.last_message_id) {
            report.issues.push(format!(
                "task `{}` snapshot points at unknown message `{}`",
                snap.task_id, snap.last_message_id
            ));
        }
    }

    diagnostics::record(store, &observed)?;

    report.ok = report.issues.is_empty();
    Ok(report)
}
