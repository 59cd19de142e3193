//! `bd create` - create an issue.

use crate::cli::context::AppContext;
use crate::cli::CreateArgs;
use crate::error::Result;
use crate::model::Issue;
use serde_json::json;

pub fn execute(args: &CreateArgs, ctx: &mut AppContext) -> Result<()> {
    // Prefer the daemon; explicit IDs and labels ride along.
    let rpc_args = json!({
        "title": args.title,
        "description": args.description,
        "priority": args.priority.as_deref().and_then(|p| p.trim_start_matches(['p', 'P']).parse::<i64>().ok()),
        "issue_type": args.issue_type,
        "assignee": args.assignee,
        "labels": args.label,
    });
    if args.id.is_none() {
        if let Some(result) = ctx.try_daemon("create", rpc_args) {
            let data = result?;
            print_created(data.get("id").and_then(|v| v.as_str()).unwrap_or("?"), ctx);
            return Ok(());
        }
    }

    let mut issue = Issue::new(args.id.clone().unwrap_or_default(), args.title.clone());
    issue.description = args.description.clone();
    if let Some(priority) = &args.priority {
        issue.priority = priority.parse()?;
    }
    if let Some(issue_type) = &args.issue_type {
        issue.issue_type = issue_type.parse()?;
    }
    issue.assignee = args.assignee.clone();
    issue.labels = args.label.clone();

    let created = ctx.storage.create_issue(&issue, &ctx.actor.clone())?;
    ctx.mark_mutated();
    print_created(&created.id, ctx);
    Ok(())
}

fn print_created(id: &str, ctx: &AppContext) {
    if ctx.json {
        println!("{}", serde_json::json!({"id": id}));
    } else {
        println!("Created {id}");
    }
}
