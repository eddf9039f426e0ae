use super::super::render;
use super::super::{Ctx, InitArgs};
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: InitArgs) -> Result<i32> {
    let report = ctx.service.init(&args.team, &args.members)?;
    ctx.emit(&report, None, || render::render_init(&report));
    Ok(0)
}
