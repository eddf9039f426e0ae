use super::super::render;
use super::super::{Ctx, ReadArgs};
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: ReadArgs) -> Result<i32> {
    let report = ctx.service.read(
        &args.team,
        &args.agent,
        args.unread,
        args.limit,
        args.cursor.as_deref(),
    )?;
    ctx.emit(&report, report.next_cursor.as_deref(), || {
        render::render_read(&report)
    });
    Ok(0)
}
