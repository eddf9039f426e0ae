//! Envelope schema v1 and the message-type dispatch table.
//!
//! Per-type behavior (retry policy, snapshot applicability, reminder
//! derivation) hangs off `MessageType` so the rest of the crate never
//! matches on raw strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{CoreError, UnknownType};
use super::identity::{AgentId, MessageId, TaskId};
use super::time::{OrderKey, Timestamp};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssign,
    TaskUpdate,
    IdleNotification,
    Handoff,
    DecisionRequired,
    ShutdownRequest,
    ShutdownApproved,
    AckReminder,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::TaskAssign,
        MessageType::TaskUpdate,
        MessageType::IdleNotification,
        MessageType::Handoff,
        MessageType::DecisionRequired,
        MessageType::ShutdownRequest,
        MessageType::ShutdownApproved,
        MessageType::AckReminder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::TaskAssign => "task_assign",
            MessageType::TaskUpdate => "task_update",
            MessageType::IdleNotification => "idle_notification",
            MessageType::Handoff => "handoff",
            MessageType::DecisionRequired => "decision_required",
            MessageType::ShutdownRequest => "shutdown_request",
            MessageType::ShutdownApproved => "shutdown_approved",
            MessageType::AckReminder => "ack_reminder",
        }
    }

    pub fn from_str(raw: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == raw)
            .ok_or_else(|| {
                UnknownType {
                    raw: raw.to_string(),
                }
                .into()
            })
    }

    /// Whether the task snapshot engine consumes this type.
    pub fn applies_to_snapshot(self) -> bool {
        matches!(self, MessageType::TaskAssign | MessageType::TaskUpdate)
    }

    /// Envelope type the delivery guard re-enqueues when nudging an unacked
    /// message. Reminders never re-enter the snapshot engine or the retry
    /// loop themselves.
    pub fn reminder_type(self) -> MessageType {
        MessageType::AckReminder
    }

    /// Built-in retry policy for `require_ack` sends of this type.
    /// Per-team `config.json` may override fields.
    pub fn delivery_policy(self) -> DeliveryPolicy {
        match self {
            MessageType::TaskAssign | MessageType::DecisionRequired => DeliveryPolicy {
                max_attempts: 5,
                base_delay_seconds: 30,
                factor: 2,
                ack_timeout_seconds: 600,
            },
            _ => DeliveryPolicy {
                max_attempts: 3,
                base_delay_seconds: 10,
                factor: 2,
                ack_timeout_seconds: 300,
            },
        }
    }
}

/// Retry schedule for one `require_ack` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
    pub factor: u32,
    pub ack_timeout_seconds: u64,
}

impl DeliveryPolicy {
    /// Delay before the attempt *after* `attempts` completed nudges:
    /// `base * factor^attempts`.
    pub fn delay_seconds(&self, attempts: u32) -> u64 {
        let factor = u64::from(self.factor);
        let mut delay = self.base_delay_seconds;
        for _ in 0..attempts {
            delay = delay.saturating_mul(factor);
        }
        delay
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A message record as written to an inbox; immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: AgentId,
    pub to: AgentId,
    pub payload: Map<String, Value>,
    pub created_at: Timestamp,
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub require_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

impl Envelope {
    /// Fresh envelope with a generated id and the current timestamp.
    pub fn new(kind: MessageType, from: AgentId, to: AgentId, payload: Map<String, Value>) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
            from,
            to,
            payload,
            created_at: Timestamp::now(),
            schema_version: SCHEMA_VERSION,
            task_id: None,
            trace_id: None,
            priority: 0,
            require_ack: false,
            cooldown_key: None,
            cooldown_seconds: None,
        }
    }

    /// Boundary validation. Serde is deliberately lenient when reading logs
    /// back; this is the strict check applied before anything is written.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CoreError::schema(format!(
                "unsupported schema_version {}",
                self.schema_version
            )));
        }
        MessageId::parse(self.id.as_str())?;
        AgentId::parse(self.from.as_str())?;
        AgentId::parse(self.to.as_str())?;
        if let Some(task_id) = &self.task_id {
            TaskId::parse(task_id.as_str())?;
        }
        Timestamp::parse(self.created_at.as_str())?;
        if let Some(key) = &self.cooldown_key
            && key.is_empty()
        {
            return Err(CoreError::schema("cooldown_key must be non-empty"));
        }
        Ok(())
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.created_at.clone(), self.id.clone())
    }
}
