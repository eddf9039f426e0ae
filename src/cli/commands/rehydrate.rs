use super::super::Ctx;
use super::super::render;
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, team: &str) -> Result<i32> {
    let report = ctx.service.rehydrate(team)?;
    ctx.emit(&report, None, || render::render_rehydrate(&report));
    Ok(0)
}
