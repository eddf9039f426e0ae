//! Human renderer for CLI outputs. Pure formatting; handlers gather data.

use crate::core::{Envelope, EventRecord};
use crate::service::{
    AckReport, DoctorReport, InitReport, ReadReport, RehydrateReport, SendReport, SendStatus,
    StatusReport, TickReport, TraceReport,
};

pub fn render_init(report: &InitReport) -> String {
    format!(
        "initialized team {} ({} members)",
        report.team,
        report.members.len()
    )
}

pub fn render_send(report: &SendReport) -> String {
    match report.status {
        SendStatus::Sent => format!("sent {}", report.message_id),
        SendStatus::Duplicate => format!("duplicate {} (no-op)", report.message_id),
        SendStatus::Suppressed => format!(
            "suppressed {} (cooldown, {}s remaining)",
            report.message_id,
            report.cooldown_remaining_seconds.unwrap_or_default()
        ),
    }
}

fn render_message(message: &Envelope) -> String {
    let mut line = format!(
        "{}  {}  {} -> {}  {}",
        message.created_at,
        message.id,
        message.from,
        message.to,
        message.kind.as_str()
    );
    if let Some(task_id) = &message.task_id {
        line.push_str(&format!("  task={task_id}"));
    }
    if let Some(subject) = message.payload.get("subject").and_then(|v| v.as_str()) {
        line.push_str(&format!("  \"{subject}\""));
    }
    line
}

pub fn render_read(report: &ReadReport) -> String {
    if report.messages.is_empty() {
        return format!("inbox {}: empty", report.agent);
    }
    let mut out = String::new();
    for message in &report.messages {
        out.push_str(&render_message(message));
        out.push('\n');
    }
    out.push_str(&format!("{} message(s)", report.count));
    if let Some(cursor) = &report.next_cursor {
        out.push_str(&format!("; more with --cursor {cursor}"));
    }
    out
}

pub fn render_ack(report: &AckReport) -> String {
    if report.already_acked {
        format!("already acked {}", report.message_id)
    } else {
        format!("acked {}", report.message_id)
    }
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = format!("team {}\n", report.team);
    for member in &report.members {
        let unread = report.unread_counts.get(member).copied().unwrap_or(0);
        out.push_str(&format!("  {member}: {unread} unread\n"));
    }
    out.push_str(&format!(
        "unread_total={} acked_total={} messages={} events={} tasks={} dead_letters={}",
        report.unread_total,
        report.acked_total,
        report.message_total,
        report.event_total,
        report.task_total,
        report.dead_letter_total
    ));
    if !report.blocked_tasks.is_empty() {
        out.push_str(&format!("\nblocked: {}", report.blocked_tasks.join(", ")));
    }
    out
}

fn render_event(event: &EventRecord) -> String {
    let subject = event.subject_id.as_deref().unwrap_or("-");
    format!("{}  {}  {}", event.ts, event.kind.as_str(), subject)
}

pub fn render_trace(report: &TraceReport) -> String {
    if report.events.is_empty() {
        return format!("no events for trace {}", report.trace_id);
    }
    let mut out = String::new();
    for event in &report.events {
        out.push_str(&render_event(event));
        out.push('\n');
    }
    out.push_str(&format!("{} event(s)", report.count));
    if let Some(cursor) = &report.next_cursor {
        out.push_str(&format!("; more with --cursor {cursor}"));
    }
    out
}

pub fn render_rehydrate(report: &RehydrateReport) -> String {
    format!(
        "rehydrated: {} messages, {} events, {} acks, {} tasks ({} malformed lines skipped)",
        report.message_count,
        report.event_count,
        report.ack_count,
        report.task_count,
        report.malformed_count
    )
}

pub fn render_doctor(report: &DoctorReport) -> String {
    let mut out = format!(
        "checked {} messages, {} events, {} acks, {} tasks",
        report.message_count, report.event_count, report.ack_count, report.task_count
    );
    if report.malformed_count > 0 {
        out.push_str(&format!(", {} malformed lines", report.malformed_count));
    }
    if report.ok {
        out.push_str("\nok");
    } else {
        for issue in &report.issues {
            out.push_str(&format!("\nissue: {issue}"));
        }
    }
    out
}

pub fn render_tick(report: &TickReport) -> String {
    format!(
        "tick: {} retried, {} dead-lettered, {} still pending",
        report.retried.len(),
        report.dead_lettered.len(),
        report.pending
    )
}
