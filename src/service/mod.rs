//! Operation layer: the protocol-level verbs the CLI exposes, built on the
//! storage engine. Every operation is a pure function of
//! `(data_root, inputs)` so tests parameterize over isolated temp roots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::config;
use crate::core::{
    AgentId, CoreError, Envelope, EventKind, EventRecord, MessageId, TeamId, Timestamp,
};
use crate::store::acks::AckRecord;
use crate::store::inbox::AppendOutcome;
use crate::store::{TeamStore, acks, cooldown, dead_letter, events, inbox, reader, snapshot};

pub mod delivery;
pub mod doctor;
pub mod rehydrate;

pub use delivery::TickReport;
pub use doctor::DoctorReport;
pub use rehydrate::RehydrateReport;

/// Operation-level refusals that are not schema errors: the request was
/// well-formed but cannot be satisfied.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpError {
    #[error("message `{message_id}` not found")]
    MessageNotFound { message_id: String },

    #[error("message `{message_id}` is addressed to `{expected}`, not `{agent}`")]
    WrongRecipient {
        message_id: String,
        expected: String,
        agent: String,
    },
}

pub type Result<T> = std::result::Result<T, crate::Error>;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Duplicate,
    Suppressed,
}

#[derive(Clone, Debug, Serialize)]
pub struct SendReport {
    pub status: SendStatus,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_seconds: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InitReport {
    pub team: String,
    pub members: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReadReport {
    pub agent: String,
    pub messages: Vec<Envelope>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AckReport {
    pub message_id: String,
    pub agent: String,
    pub already_acked: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub team: String,
    pub members: Vec<String>,
    pub unread_counts: BTreeMap<String, usize>,
    pub unread_total: usize,
    pub acked_total: usize,
    pub message_total: usize,
    pub event_total: usize,
    pub task_total: usize,
    pub dead_letter_total: usize,
    pub blocked_tasks: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TraceReport {
    pub trace_id: String,
    pub events: Vec<EventRecord>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub struct Service {
    root: PathBuf,
}

impl Service {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_unchecked(&self, team: &str) -> Result<TeamStore> {
        let team = TeamId::parse(team)?;
        Ok(TeamStore::open(&self.root, team))
    }

    /// Open an existing team; an unknown team is a bootstrap error.
    pub fn open_team(&self, team: &str) -> Result<TeamStore> {
        let store = self.store_unchecked(team)?;
        if !store.exists() {
            return Err(CoreError::bootstrap(format!(
                "unknown team `{}` under {}",
                store.team(),
                self.root.display()
            ))
            .into());
        }
        Ok(store)
    }

    /// Create the directory skeleton and seed empty derived state.
    pub fn init(&self, team: &str, members: &[String]) -> Result<InitReport> {
        let store = self.store_unchecked(team)?;
        store.ensure_layout()?;

        let mut parsed = Vec::new();
        for member in members {
            parsed.push(AgentId::parse(member.as_str())?);
        }
        for agent in &parsed {
            let path = store.inbox_path(agent);
            if !path.exists() {
                std::fs::write(&path, b"")
                    .map_err(|e| crate::store::StoreError::io(&path, e))?;
            }
        }

        // Seed empty indexes so fresh teams start natively sharded. Re-init
        // of an existing team must not disturb live state.
        let empty: BTreeMap<String, Value> = BTreeMap::new();
        if !store.message_shards_dir().exists() {
            crate::store::index::ShardedIndex::messages(&store).replace_all(&empty)?;
        }
        if !store.event_shards_dir().exists() {
            crate::store::index::ShardedIndex::events(&store).replace_all(&empty)?;
        }
        for path in [store.ack_index_path(), store.nudge_index_path()] {
            if !path.exists() {
                crate::store::atomic::write_json_atomic(&path, &empty)?;
            }
        }

        if !store.team_meta_path().exists() {
            crate::store::atomic::write_json_atomic(
                &store.team_meta_path(),
                &json!({
                    "team": store.team().as_str(),
                    "members": members,
                    "schema_version": 1,
                    "created_at": Timestamp::now().as_str(),
                }),
            )?;
        }

        tracing::info!(team = %store.team(), members = members.len(), "team initialized");
        Ok(InitReport {
            team: store.team().as_str().to_string(),
            members: members.to_vec(),
        })
    }

    /// Validated, deduped, cooldown-gated send.
    pub fn send(&self, team: &str, envelope: Envelope) -> Result<SendReport> {
        envelope.validate()?;
        let store = self.open_team(team)?;

        if let (Some(key), Some(secs)) = (&envelope.cooldown_key, envelope.cooldown_seconds)
            && secs > 0
        {
            let state_key = cooldown::cooldown_key(store.team(), &envelope.to, key);
            let now = Timestamp::now();
            let remaining =
                cooldown::check_and_record(&store, &state_key, secs, now.unix_seconds())?;
            if remaining > 0 {
                let event = EventRecord::new(EventKind::NudgeSuppressed)
                    .subject(envelope.id.as_str())
                    .trace(envelope.trace_id.clone())
                    .attr("to", envelope.to.as_str())
                    .attr("cooldown_key", key.as_str())
                    .attr("cooldown_remaining_seconds", remaining);
                events::append_event(&store, &event)?;
                tracing::debug!(
                    message_id = %envelope.id,
                    remaining,
                    "send suppressed by cooldown"
                );
                return Ok(SendReport {
                    status: SendStatus::Suppressed,
                    message_id: envelope.id.as_str().to_string(),
                    cooldown_remaining_seconds: Some(remaining),
                });
            }
        }

        let outcome = inbox::append_message(&store, &envelope)?;
        if outcome == AppendOutcome::Duplicate {
            // Idempotence contract: the caller observes success, nothing is
            // appended and no second `sent` event exists.
            return Ok(SendReport {
                status: SendStatus::Duplicate,
                message_id: envelope.id.as_str().to_string(),
                cooldown_remaining_seconds: None,
            });
        }

        let mut event = EventRecord::new(EventKind::Sent)
            .subject(envelope.id.as_str())
            .trace(envelope.trace_id.clone())
            .attr("from", envelope.from.as_str())
            .attr("to", envelope.to.as_str())
            .attr("type", envelope.kind.as_str());
        if envelope.require_ack {
            // This attr is the delivery guard's registration record.
            event = event.attr("require_ack", true);
        }
        if let Some(task_id) = &envelope.task_id {
            event = event.attr("task_id", task_id.as_str());
        }
        events::append_event(&store, &event)?;

        snapshot::apply_message(&store, &envelope)?;

        tracing::debug!(message_id = %envelope.id, to = %envelope.to, "message sent");
        Ok(SendReport {
            status: SendStatus::Sent,
            message_id: envelope.id.as_str().to_string(),
            cooldown_remaining_seconds: None,
        })
    }

    pub fn read(
        &self,
        team: &str,
        agent: &str,
        unread_only: bool,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ReadReport> {
        let store = self.open_team(team)?;
        let agent = AgentId::parse(agent)?;

        let page = reader::read_window(&store, &agent, unread_only, limit, cursor)?;

        let mut event = EventRecord::new(EventKind::Read)
            .subject(agent.as_str())
            .attr("agent", agent.as_str())
            .attr("count", page.messages.len())
            .attr("unread_only", unread_only);
        if let Some(cursor) = cursor {
            event = event.attr("cursor", cursor);
        }
        if let Some(next) = &page.next_cursor {
            event = event.attr("next_cursor", next.as_str());
        }
        events::append_event(&store, &event)?;

        Ok(ReadReport {
            agent: agent.as_str().to_string(),
            count: page.messages.len(),
            messages: page.messages,
            next_cursor: page.next_cursor,
        })
    }

    pub fn ack(&self, team: &str, agent: &str, message_id: &str) -> Result<AckReport> {
        let store = self.open_team(team)?;
        let agent = AgentId::parse(agent)?;
        let message_id = MessageId::parse(message_id)?;

        let Some(envelope) = inbox::get_message(&store, &message_id)? else {
            let event = EventRecord::new(EventKind::AckRejected)
                .subject(message_id.as_str())
                .attr("agent", agent.as_str())
                .attr("reason", "message_not_found");
            events::append_event(&store, &event)?;
            return Err(OpError::MessageNotFound {
                message_id: message_id.as_str().to_string(),
            }
            .into());
        };

        if envelope.to != agent {
            let event = EventRecord::new(EventKind::AckRejected)
                .subject(message_id.as_str())
                .trace(envelope.trace_id.clone())
                .attr("agent", agent.as_str())
                .attr("reason", "wrong_recipient")
                .attr("expected", envelope.to.as_str());
            events::append_event(&store, &event)?;
            return Err(OpError::WrongRecipient {
                message_id: message_id.as_str().to_string(),
                expected: envelope.to.as_str().to_string(),
                agent: agent.as_str().to_string(),
            }
            .into());
        }

        let created = acks::record(
            &store,
            AckRecord {
                message_id: message_id.clone(),
                acked_by: agent.clone(),
                acked_at: Timestamp::now(),
                trace_id: envelope.trace_id.clone(),
            },
        )?;

        if created {
            let event = EventRecord::new(EventKind::Acked)
                .subject(message_id.as_str())
                .trace(envelope.trace_id.clone())
                .attr("acked_by", agent.as_str());
            events::append_event(&store, &event)?;
        }

        Ok(AckReport {
            message_id: message_id.as_str().to_string(),
            agent: agent.as_str().to_string(),
            already_acked: !created,
        })
    }

    pub fn status(&self, team: &str) -> Result<StatusReport> {
        let store = self.open_team(team)?;
        let ack_index = acks::load(&store);

        let mut members: Vec<String> = Vec::new();
        let mut unread_counts = BTreeMap::new();
        let mut unread_total = 0usize;
        let mut message_total = 0usize;

        for (agent, path) in store.list_inboxes()? {
            let outcome = crate::store::jsonl::read_objects(&path)?;
            let mut unread = 0usize;
            for record in &outcome.records {
                message_total += 1;
                let id = record.value.get("id").and_then(Value::as_str).unwrap_or("");
                if !id.is_empty() && !ack_index.contains_key(id) {
                    unread += 1;
                }
            }
            unread_total += unread;
            unread_counts.insert(agent.as_str().to_string(), unread);
            members.push(agent.as_str().to_string());
        }

        let mut event_total = 0usize;
        for path in store.list_event_files()? {
            event_total += crate::store::jsonl::read_objects(&path)?.records.len();
        }

        let snapshots = snapshot::read_all(&store)?;
        let blocked_tasks = snapshots
            .iter()
            .filter(|s| s.status.eq_ignore_ascii_case("blocked"))
            .map(|s| s.task_id.as_str().to_string())
            .collect();

        let dead_letter_total = dead_letter::read_all(&store)?.len();

        Ok(StatusReport {
            team: store.team().as_str().to_string(),
            members,
            unread_counts,
            unread_total,
            acked_total: ack_index.len(),
            message_total,
            event_total,
            task_total: snapshots.len(),
            dead_letter_total,
            blocked_tasks,
        })
    }

    pub fn trace(
        &self,
        team: &str,
        trace_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<TraceReport> {
        let store = self.open_team(team)?;
        let page = reader::trace_window(&store, trace_id, limit, cursor)?;
        Ok(TraceReport {
            trace_id: trace_id.to_string(),
            count: page.events.len(),
            events: page.events,
            next_cursor: page.next_cursor,
        })
    }

    pub fn rehydrate(&self, team: &str) -> Result<RehydrateReport> {
        let store = self.open_team(team)?;
        let report = rehydrate::rehydrate(&store)?;

        // Emitted outside the rehydrate lock: `events` ranks below
        // `state-rehydrate` and must not nest inside it.
        let event = EventRecord::new(EventKind::Rehydrated)
            .attr("message_count", report.message_count)
            .attr("event_count", report.event_count)
            .attr("ack_count", report.ack_count)
            .attr("task_count", report.task_count)
            .attr("malformed_count", report.malformed_count);
        events::append_event(&store, &event)?;

        tracing::info!(
            messages = report.message_count,
            events = report.event_count,
            tasks = report.task_count,
            "rehydrate completed"
        );
        Ok(report)
    }

    pub fn doctor_check(&self, team: &str) -> Result<DoctorReport> {
        let store = self.open_team(team)?;
        Ok(doctor::check(&store)?)
    }

    /// Delivery-guard tick, driven externally (cron or tests).
    pub fn tick(&self, team: &str, now: Timestamp) -> Result<TickReport> {
        let store = self.open_team(team)?;
        let team_config = config::load(&store);
        delivery::tick(&store, &team_config, &now)
    }

    /// Convenience for `task-assign`.
    #[allow(clippy::too_many_arguments)]
    pub fn task_assign(
        &self,
        team: &str,
        from: &str,
        to: &str,
        task_id: &str,
        subject: &str,
        details: Option<&str>,
        trace_id: Option<&str>,
        require_ack: bool,
    ) -> Result<SendReport> {
        let mut payload = Map::new();
        payload.insert("subject".to_string(), json!(subject));
        if let Some(details) = details {
            payload.insert("details".to_string(), json!(details));
        }
        let mut envelope = Envelope::new(
            crate::core::MessageType::TaskAssign,
            AgentId::parse(from)?,
            AgentId::parse(to)?,
            payload,
        );
        envelope.task_id = Some(crate::core::TaskId::parse(task_id)?);
        envelope.trace_id = trace_id.map(String::from);
        envelope.require_ack = require_ack;
        self.send(team, envelope)
    }

    /// Convenience for `task-update`.
    #[allow(clippy::too_many_arguments)]
    pub fn task_update(
        &self,
        team: &str,
        from: &str,
        to: &str,
        task_id: &str,
        status: &str,
        note: Option<&str>,
        trace_id: Option<&str>,
    ) -> Result<SendReport> {
        let mut payload = Map::new();
        payload.insert("status".to_string(), json!(status));
        if let Some(note) = note {
            payload.insert("note".to_string(), json!(note));
        }
        let mut envelope = Envelope::new(
            crate::core::MessageType::TaskUpdate,
            AgentId::parse(from)?,
            AgentId::parse(to)?,
            payload,
        );
        envelope.task_id = Some(crate::core::TaskId::parse(task_id)?);
        envelope.trace_id = trace_id.map(String::from);
        self.send(team, envelope)
    }
}
