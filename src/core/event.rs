//! Operational event records, one JSONL line per event in the per-day log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identity::short_uuid;
use super::time::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sent,
    Read,
    Acked,
    AckRejected,
    RetryScheduled,
    DeadLettered,
    Rehydrated,
    MalformedSkipped,
    NudgeSuppressed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Sent => "sent",
            EventKind::Read => "read",
            EventKind::Acked => "acked",
            EventKind::AckRejected => "ack_rejected",
            EventKind::RetryScheduled => "retry_scheduled",
            EventKind::DeadLettered => "dead_lettered",
            EventKind::Rehydrated => "rehydrated",
            EventKind::MalformedSkipped => "malformed_skipped",
            EventKind::NudgeSuppressed => "nudge_suppressed",
        }
    }
}

/// One operational event. `subject_id` is the message or resource the event
/// is about; `attrs` carries kind-specific detail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub ts: Timestamp,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl EventRecord {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: format!("evt_{}", short_uuid()),
            ts: Timestamp::now(),
            kind,
            subject_id: None,
            trace_id: None,
            attrs: Map::new(),
        }
    }

    pub fn at(mut self, ts: Timestamp) -> Self {
        self.ts = ts;
        self
    }

    pub fn subject(mut self, id: impl Into<String>) -> Self {
        self.subject_id = Some(id.into());
        self
    }

    pub fn trace(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    /// String attr lookup, tolerant of absent keys.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attrs.get(key).and_then(Value::as_u64)
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).and_then(Value::as_i64)
    }
}
