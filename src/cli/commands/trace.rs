use super::super::render;
use super::super::{Ctx, TraceArgs};
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: TraceArgs) -> Result<i32> {
    let report = ctx.service.trace(
        &args.team,
        &args.trace_id,
        args.limit,
        args.cursor.as_deref(),
    )?;
    ctx.emit(&report, report.next_cursor.as_deref(), || {
        render::render_trace(&report)
    });
    Ok(0)
}
