//! Task snapshot engine: monotonic merge of task messages.
//!
//! Ordering key is `(created_at, message_id)`, both compared as strings.
//! An incoming message applies iff its key is strictly greater than the
//! snapshot's `(last_message_created_at, last_message_id)`; equal or lesser
//! keys are discarded without error, so replaying a log in any order
//! converges on the same snapshot.

use serde::{Deserialize, Serialize};

use crate::core::{Envelope, MessageType, TaskId};

use super::lock::{LockResource, with_lock};
use super::{StoreResult, TeamStore, atomic};

pub const CONFLICT_POLICY: &str = "created_at_then_message_id_monotonic";
const HISTORY_CAP: usize = 32;

fn default_policy() -> String {
    CONFLICT_POLICY.to_string()
}

/// Derived task state. Legacy snapshots written before version metadata
/// existed deserialize with empty `last_message_*` fields, which compare
/// below every real key - the first applied update populates them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub reporter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub history_summary: Vec<String>,
    #[serde(default)]
    pub snapshot_version: u64,
    #[serde(default)]
    pub last_message_id: String,
    #[serde(default)]
    pub last_message_created_at: String,
    #[serde(default = "default_policy")]
    pub snapshot_conflict_policy: String,
}

impl TaskSnapshot {
    fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: String::new(),
            subject: None,
            details: None,
            assignee: String::new(),
            reporter: String::new(),
            trace_id: None,
            history_summary: Vec::new(),
            snapshot_version: 0,
            last_message_id: String::new(),
            last_message_created_at: String::new(),
            snapshot_conflict_policy: default_policy(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Key not strictly greater than the snapshot's; merge skipped.
    Stale,
    /// Message type or missing task_id makes this a non-task message.
    NotApplicable,
}

/// Task id of a message the snapshot engine consumes, if any.
pub fn applicable_task(envelope: &Envelope) -> Option<TaskId> {
    if envelope.kind.applies_to_snapshot() {
        envelope.task_id.clone()
    } else {
        None
    }
}

/// Pure merge, shared by the live path and rehydrate replay. The caller
/// has already established applicability via `applicable_task`.
pub fn merge(
    task_id: TaskId,
    existing: Option<TaskSnapshot>,
    envelope: &Envelope,
) -> (TaskSnapshot, ApplyOutcome) {
    let mut snapshot = existing.unwrap_or_else(|| TaskSnapshot::empty(task_id));

    let incoming = (
        envelope.created_at.as_str(),
        envelope.id.as_str(),
    );
    let current = (
        snapshot.last_message_created_at.as_str(),
        snapshot.last_message_id.as_str(),
    );
    if incoming <= current {
        return (snapshot, ApplyOutcome::Stale);
    }

    let payload_str = |key: &str| -> Option<String> {
        envelope
            .payload
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    match envelope.kind {
        MessageType::TaskAssign => {
            snapshot.status = "assigned".to_string();
            snapshot.assignee = envelope.to.as_str().to_string();
            snapshot.reporter = envelope.from.as_str().to_string();
            if let Some(subject) = payload_str("subject") {
                snapshot.subject = Some(subject);
            }
            if let Some(details) = payload_str("details") {
                snapshot.details = Some(details);
            }
        }
        _ => {
            if let Some(status) = payload_str("status") {
                snapshot.status = status;
            }
            if let Some(subject) = payload_str("subject") {
                snapshot.subject = Some(subject);
            }
            if let Some(note) = payload_str("note") {
                snapshot.details = Some(note);
            }
        }
    }

    if let Some(trace_id) = &envelope.trace_id {
        snapshot.trace_id = Some(trace_id.clone());
    }

    snapshot.history_summary.push(format!(
        "{} {} from {}",
        envelope.created_at.as_str(),
        envelope.kind.as_str(),
        envelope.from.as_str()
    ));
    if snapshot.history_summary.len() > HISTORY_CAP {
        let excess = snapshot.history_summary.len() - HISTORY_CAP;
        snapshot.history_summary.drain(..excess);
    }

    snapshot.snapshot_version += 1;
    snapshot.last_message_id = envelope.id.as_str().to_string();
    snapshot.last_message_created_at = envelope.created_at.as_str().to_string();
    snapshot.snapshot_conflict_policy = default_policy();

    (snapshot, ApplyOutcome::Applied)
}

pub fn read(store: &TeamStore, task_id: &TaskId) -> Option<TaskSnapshot> {
    let path = store.task_path(task_id);
    let value: Option<serde_json::Value> = atomic::read_json_or(&path, || None);
    value.and_then(|v| serde_json::from_value(v).ok())
}

/// Merge `envelope` into its task snapshot under the `task-snapshots` lock.
pub fn apply_message(store: &TeamStore, envelope: &Envelope) -> StoreResult<ApplyOutcome> {
    let Some(task_id) = applicable_task(envelope) else {
        return Ok(ApplyOutcome::NotApplicable);
    };

    with_lock(store, LockResource::TaskSnapshots, || {
        let existing = read(store, &task_id);
        let (snapshot, outcome) = merge(task_id.clone(), existing, envelope);
        if outcome == ApplyOutcome::Applied {
            atomic::write_json_atomic(&store.task_path(&task_id), &snapshot)?;
        }
        Ok(outcome)
    })
}

/// All readable snapshots, sorted by task id.
pub fn read_all(store: &TeamStore) -> StoreResult<Vec<TaskSnapshot>> {
    let mut snapshots = Vec::new();
    for path in store.list_task_files()? {
        let value: Option<serde_json::Value> = atomic::read_json_or(&path, || None);
        if let Some(snapshot) = value.and_then(|v| serde_json::from_value::<TaskSnapshot>(v).ok()) {
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgentId, MessageId, Timestamp};
    use serde_json::{Map, json};

    fn update(id: &str, created_at: &str, status: &str) -> Envelope {
        let mut payload = Map::new();
        payload.insert("status".to_string(), json!(status));
        let mut env = Envelope::new(
            MessageType::TaskUpdate,
            AgentId::parse("dev").unwrap(),
            AgentId::parse("lead").unwrap(),
            payload,
        );
        env.id = MessageId::parse(id).unwrap();
        env.created_at = Timestamp::parse(created_at).unwrap();
        env.task_id = Some(TaskId::parse("task_7").unwrap());
        env
    }

    #[test]
    fn later_key_applies_earlier_key_is_discarded() {
        let u2 = update("u2", "2025-01-01T00:00:02Z", "done");
        let u1 = update("u1", "2025-01-01T00:00:01Z", "in_progress");

        // Delivery order u2 then u1: u1 must not roll the snapshot back.
        let task = TaskId::parse("task_7").unwrap();
        let (snap, outcome) = merge(task.clone(), None, &u2);
        assert_eq!(outcome, ApplyOutcome::Applied);
        let (snap, outcome) = merge(task.clone(), Some(snap), &u1);
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(snap.last_message_id, "u2");
        assert_eq!(snap.status, "done");
        assert_eq!(snap.snapshot_version, 1);

        // Opposite delivery order converges on the same terminal state.
        let (snap_b, _) = merge(task.clone(), None, &u1);
        let (snap_b, _) = merge(task, Some(snap_b), &u2);
        assert_eq!(snap_b.last_message_id, "u2");
        assert_eq!(snap_b.status, "done");
    }

    #[test]
    fn equal_created_at_tiebreaks_on_message_id() {
        let ua = update("ua", "2025-01-01T00:00:01Z", "first");
        let ub = update("ub", "2025-01-01T00:00:01Z", "second");

        let task = TaskId::parse("task_7").unwrap();
        let (snap, _) = merge(task.clone(), None, &ub);
        let (snap, outcome) = merge(task, Some(snap), &ua);
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(snap.status, "second");
    }

    #[test]
    fn same_key_twice_is_discarded() {
        let u = update("u1", "2025-01-01T00:00:01Z", "x");
        let task = TaskId::parse("task_7").unwrap();
        let (snap, _) = merge(task.clone(), None, &u);
        let (snap, outcome) = merge(task, Some(snap), &u);
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(snap.snapshot_version, 1);
    }

    #[test]
    fn assign_populates_parties_and_subject() {
        let mut payload = Map::new();
        payload.insert("subject".to_string(), json!("Impl"));
        let mut env = Envelope::new(
            MessageType::TaskAssign,
            AgentId::parse("lead").unwrap(),
            AgentId::parse("dev").unwrap(),
            payload,
        );
        env.task_id = Some(TaskId::parse("task_1").unwrap());
        env.trace_id = Some("tr_001".to_string());

        let task = applicable_task(&env).unwrap();
        let (snap, outcome) = merge(task, None, &env);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(snap.status, "assigned");
        assert_eq!(snap.assignee, "dev");
        assert_eq!(snap.reporter, "lead");
        assert_eq!(snap.subject.as_deref(), Some("Impl"));
        assert_eq!(snap.trace_id.as_deref(), Some("tr_001"));
        assert_eq!(snap.history_summary.len(), 1);
    }

    #[test]
    fn legacy_snapshot_without_metadata_accepts_first_update() {
        let legacy = json!({
            "task_id": "task_7",
            "status": "assigned",
            "assignee": "dev"
        });
        let snapshot: TaskSnapshot = serde_json::from_value(legacy).unwrap();
        assert_eq!(snapshot.snapshot_version, 0);
        assert!(snapshot.last_message_id.is_empty());

        let task = TaskId::parse("task_7").unwrap();
        let (snap, outcome) = merge(
            task,
            Some(snapshot),
            &update("u1", "2025-01-01T00:00:01Z", "done"),
        );
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(snap.snapshot_version, 1);
        assert_eq!(snap.last_message_id, "u1");
        assert_eq!(snap.assignee, "dev");
    }

    #[test]
    fn non_task_messages_are_not_applicable() {
        let mut env = Envelope::new(
            MessageType::Handoff,
            AgentId::parse("a").unwrap(),
            AgentId::parse("b").unwrap(),
            Map::new(),
        );
        env.task_id = Some(TaskId::parse("task_1").unwrap());
        assert!(applicable_task(&env).is_none());
    }
}
