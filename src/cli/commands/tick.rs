use super::super::render;
use super::super::{Ctx, TickArgs};
use crate::Result;
use crate::core::Timestamp;

pub(crate) fn handle(ctx: &Ctx, args: TickArgs) -> Result<i32> {
    let now = match args.now {
        Some(raw) => Timestamp::parse(raw)?,
        None => Timestamp::now(),
    };
    let report = ctx.service.tick(&args.team, now)?;
    ctx.emit(&report, None, || render::render_tick(&report));
    Ok(0)
}
