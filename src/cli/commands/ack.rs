use super::super::render;
use super::super::{AckArgs, Ctx};
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: AckArgs) -> Result<i32> {
    let report = ctx
        .service
        .ack(&args.team, &args.agent, &args.message_id)?;
    ctx.emit(&report, None, || render::render_ack(&report));
    Ok(0)
}
