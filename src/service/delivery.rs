//! Delivery guard for `require_ack` sends.
//!
//! There is no dedicated guard state file: the pending set is
//! reconstructed from the event log (`sent` with `require_ack`,
//! `retry_scheduled`, `acked`, `dead_lettered`) plus the ack index. The
//! terminal transition *is* the terminal event, so a message moves to
//! acked or dead-lettered exactly once.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::config::{self, TeamConfig};
use crate::core::{
    Envelope, EventKind, EventRecord, MessageId, MessageType, TaskId, Timestamp,
};
use crate::store::dead_letter::DeadLetter;
use crate::store::{TeamStore, acks, dead_letter, events, inbox};

#[derive(Clone, Debug)]
pub struct PendingDelivery {
    pub message_id: String,
    pub kind: MessageType,
    pub trace_id: Option<String>,
    pub task_id: Option<String>,
    pub first_sent_at: Timestamp,
    pub attempts: u32,
    pub next_attempt_unix: i64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TickReport {
    pub retried: Vec<String>,
    pub dead_lettered: Vec<String>,
    pub pending: usize,
}

/// Rebuild the pending set by replaying events in log order.
pub fn pending_deliveries(
    store: &TeamStore,
    team_config: &TeamConfig,
) -> crate::store::StoreResult<BTreeMap<String, PendingDelivery>> {
    let mut pending: BTreeMap<String, PendingDelivery> = BTreeMap::new();

    for event in events::read_all(store)? {
        let Some(subject) = event.subject_id.clone() else {
            continue;
        };
        match event.kind {
            EventKind::Sent => {
                if event.attrs.get("require_ack").and_then(|v| v.as_bool()) != Some(true) {
                    continue;
                }
                let Some(kind) = event
                    .attr_str("type")
                    .and_then(|raw| MessageType::from_str(raw).ok())
                else {
                    continue;
                };
                let policy = config::resolve_policy(team_config, kind);
                let first_sent_at = event.ts.clone();
                let next_attempt_unix =
                    first_sent_at.unix_seconds() + policy.base_delay_seconds as i64;
                pending.insert(
                    subject.clone(),
                    PendingDelivery {
                        message_id: subject,
                        kind,
                        trace_id: event.trace_id.clone(),
                        task_id: event.attr_str("task_id").map(String::from),
                        first_sent_at,
                        attempts: 0,
                        next_attempt_unix,
                    },
                );
            }
            EventKind::RetryScheduled => {
                if let Some(entry) = pending.get_mut(&subject) {
                    if let Some(attempt) = event.attr_u64("attempt") {
                        entry.attempts = attempt as u32;
                    }
                    if let Some(next) = event.attr_i64("next_attempt_at") {
                        entry.next_attempt_unix = next;
                    }
                }
            }
            EventKind::Acked | EventKind::DeadLettered => {
                pending.remove(&subject);
            }
            _ => {}
        }
    }

    // Acks recorded whose event append was lost to a crash still count.
    let ack_index = acks::load(store);
    pending.retain(|id, _| !ack_index.contains_key(id));

    Ok(pending)
}

/// One guard pass: nudge or dead-letter every due, unacked entry.
pub fn tick(
    store: &TeamStore,
    team_config: &TeamConfig,
    now: &Timestamp,
) -> super::Result<TickReport> {
    let pending = pending_deliveries(store, team_config)?;
    let now_unix = now.unix_seconds();
    let mut report = TickReport::default();

    for entry in pending.values() {
        if entry.next_attempt_unix > now_unix {
            continue;
        }
        let policy = config::resolve_policy(team_config, entry.kind);
        let elapsed = now_unix.saturating_sub(entry.first_sent_at.unix_seconds());
        let exhausted = entry.attempts >= policy.max_attempts;
        let timed_out = elapsed > policy.ack_timeout_seconds as i64;

        if exhausted || timed_out {
            terminate(store, entry, now, &mut report)?;
        } else {
            nudge(store, entry, now, policy.delay_seconds(entry.attempts + 1), &mut report)?;
        }
    }

    report.pending = pending_deliveries(store, team_config)?.len();
    Ok(report)
}

fn nudge(
    store: &TeamStore,
    entry: &PendingDelivery,
    now: &Timestamp,
    delay_seconds: u64,
    report: &mut TickReport,
) -> super::Result<()> {
    let Some(original) = lookup_original(store, &entry.message_id)? else {
        // Without the original envelope there is nothing left to deliver.
        terminate(store, entry, now, report)?;
        return Ok(());
    };

    let attempt = entry.attempts + 1;
    let mut payload = serde_json::Map::new();
    payload.insert("reminder_of".to_string(), json!(entry.message_id));
    payload.insert("attempt".to_string(), json!(attempt));

    let mut reminder = Envelope::new(
        original.kind.reminder_type(),
        original.from.clone(),
        original.to.clone(),
        payload,
    );
    reminder.created_at = now.clone();
    reminder.trace_id = entry.trace_id.clone();
    reminder.task_id = entry
        .task_id
        .as_deref()
        .and_then(|raw| TaskId::parse(raw).ok());

    inbox::append_message(store, &reminder)?;
    let sent = EventRecord::new(EventKind::Sent)
        .at(now.clone())
        .subject(reminder.id.as_str())
        .trace(reminder.trace_id.clone())
        .attr("from", reminder.from.as_str())
        .attr("to", reminder.to.as_str())
        .attr("type", reminder.kind.as_str());
    events::append_event(store, &sent)?;

    let next_attempt_unix = now.unix_seconds() + delay_seconds as i64;
    let retry = EventRecord::new(EventKind::RetryScheduled)
        .at(now.clone())
        .subject(&entry.message_id)
        .trace(entry.trace_id.clone())
        .attr("attempt", attempt)
        .attr("next_attempt_at", next_attempt_unix)
        .attr("reminder_id", reminder.id.as_str());
    events::append_event(store, &retry)?;

    tracing::debug!(
        message_id = %entry.message_id,
        attempt,
        "ack outstanding, nudge enqueued"
    );
    report.retried.push(entry.message_id.clone());
    Ok(())
}

fn terminate(
    store: &TeamStore,
    entry: &PendingDelivery,
    now: &Timestamp,
    report: &mut TickReport,
) -> super::Result<()> {
    let mut event = EventRecord::new(EventKind::DeadLettered)
        .at(now.clone())
        .subject(&entry.message_id)
        .trace(entry.trace_id.clone())
        .attr("attempts", entry.attempts);

    if let Some(original) = lookup_original(store, &entry.message_id)? {
        let letter = DeadLetter::new(
            original,
            entry.attempts,
            format!("no ack after {} attempts", entry.attempts),
            now.clone(),
        );
        dead_letter::append(store, &letter)?;
        event = event.attr("dead_letter_id", letter.id.as_str());
    } else {
        event = event.attr("reason", "original envelope missing");
    }

    events::append_event(store, &event)?;
    tracing::warn!(message_id = %entry.message_id, "delivery dead-lettered");
    report.dead_lettered.push(entry.message_id.clone());
    Ok(())
}

fn lookup_original(
    store: &TeamStore,
    message_id: &str,
) -> crate::store::StoreResult<Option<Envelope>> {
    match MessageId::parse(message_id) {
        Ok(id) => inbox::get_message(store, &id),
        Err(_) => Ok(None),
    }
}
