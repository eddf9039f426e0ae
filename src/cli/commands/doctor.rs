use super::super::Ctx;
use super::super::render;
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, team: &str) -> Result<i32> {
    let report = ctx.service.doctor_check(team)?;
    ctx.emit(&report, None, || render::render_doctor(&report));
    Ok(if report.ok { 0 } else { 1 })
}
