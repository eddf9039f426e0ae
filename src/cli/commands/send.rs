use serde_json::Value;

use super::super::render;
use super::super::{Ctx, SendArgs};
use crate::Result;
use crate::core::{AgentId, CoreError, Envelope, MessageId, MessageType, TaskId};

pub(crate) fn handle(ctx: &Ctx, args: SendArgs) -> Result<i32> {
    let kind = MessageType::from_str(&args.kind)?;
    let payload = parse_payload(&args.payload)?;

    let mut envelope = Envelope::new(
        kind,
        AgentId::parse(args.from.as_str())?,
        AgentId::parse(args.to.as_str())?,
        payload,
    );
    if let Some(id) = args.message_id {
        envelope.id = MessageId::parse(id)?;
    }
    if let Some(task_id) = args.task_id {
        envelope.task_id = Some(TaskId::parse(task_id)?);
    }
    envelope.trace_id = args.trace_id;
    envelope.priority = args.priority;
    envelope.require_ack = args.require_ack;
    envelope.cooldown_key = args.cooldown_key;
    envelope.cooldown_seconds = args.cooldown_seconds;

    let report = ctx.service.send(&args.team, envelope)?;
    ctx.emit(&report, None, || render::render_send(&report));
    Ok(0)
}

fn parse_payload(raw: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CoreError::schema("--payload must be a JSON object").into()),
        Err(e) => Err(CoreError::schema(format!("--payload is not valid JSON: {e}")).into()),
    }
}
