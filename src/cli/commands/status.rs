use super::super::render;
use super::super::{Ctx, StatusArgs};
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: StatusArgs) -> Result<i32> {
    let report = ctx.service.status(&args.team)?;
    ctx.emit(&report, None, || render::render_status(&report));
    Ok(0)
}
