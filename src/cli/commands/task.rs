use super::super::render;
use super::super::{Ctx, TaskAssignArgs, TaskUpdateArgs};
use crate::Result;

pub(crate) fn handle_assign(ctx: &Ctx, args: TaskAssignArgs) -> Result<i32> {
    let report = ctx.service.task_assign(
        &args.team,
        &args.from,
        &args.to,
        &args.task_id,
        &args.subject,
        args.details.as_deref(),
        args.trace_id.as_deref(),
        args.require_ack,
    )?;
    ctx.emit(&report, None, || render::render_send(&report));
    Ok(0)
}

pub(crate) fn handle_update(ctx: &Ctx, args: TaskUpdateArgs) -> Result<i32> {
    let report = ctx.service.task_update(
        &args.team,
        &args.from,
        &args.to,
        &args.task_id,
        &args.status,
        args.note.as_deref(),
        args.trace_id.as_deref(),
    )?;
    ctx.emit(&report, None, || render::render_send(&report));
    Ok(0)
}
