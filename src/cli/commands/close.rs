//! `bd close` - close one or more issues.

use crate::cli::context::AppContext;
use crate::cli::CloseArgs;
use crate::error::Result;
use serde_json::json;

pub fn execute(args: &CloseArgs, ctx: &mut AppContext) -> Result<()> {
    for id in &args.ids {
        if let Some(result) =
            ctx.try_daemon("close", json!({"id": id, "reason": args.reason}))
        {
            result?;
            println!("Closed {id}");
            continue;
        }

        let closed = ctx
            .storage
            .close_issue(id, args.reason.as_deref(), &ctx.actor.clone())?;
        ctx.mark_mutated();
        println!("Closed {}", closed.id);
    }
    Ok(())
}
