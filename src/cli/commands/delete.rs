//! `bd delete` - hard delete with cascade/orphan accounting.

use crate::cli::context::AppContext;
use crate::cli::DeleteArgs;
use crate::error::Result;

pub fn execute(args: &DeleteArgs, ctx: &mut AppContext) -> Result<()> {
    let result = ctx.storage.delete_issues(
        &args.ids,
        args.cascade,
        args.force,
        args.dry_run,
        &ctx.actor.clone(),
    )?;

    if !args.dry_run {
        ctx.mark_mutated();
    }

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let verb = if args.dry_run { "Would delete" } else { "Deleted" };
        println!(
            "{verb} {} issue(s); {} dependency edge(s), {} label(s), {} comment(s), {} event(s)",
            result.deleted_count,
            result.deps_removed,
            result.labels_removed,
            result.comments_removed,
            result.events_removed
        );
        if !result.orphaned_issues.is_empty() {
            println!("Orphaned references: {}", result.orphaned_issues.join(", "));
        }
    }
    Ok(())
}
