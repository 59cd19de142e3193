//! `bd show` - one issue with relations and optional history.

use crate::cli::context::AppContext;
use crate::cli::ShowArgs;
use crate::error::{BeadsError, Result};

pub fn execute(args: &ShowArgs, ctx: &AppContext) -> Result<()> {
    let issue = ctx
        .storage
        .get_issue_full(&args.id)?
        .ok_or_else(|| BeadsError::IssueNotFound {
            id: args.id.clone(),
        })?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
        return Ok(());
    }

    println!("{}  {}", issue.id, issue.title);
    println!(
        "  {} | {} | {}{}",
        issue.status,
        issue.priority,
        issue.issue_type,
        issue
            .assignee
            .as_deref()
            .map(|a| format!(" | @{a}"))
            .unwrap_or_default()
    );
    if let Some(description) = &issue.description {
        println!("\n{description}");
    }
    if let Some(design) = &issue.design {
        println!("\nDesign:\n{design}");
    }
    if let Some(criteria) = &issue.acceptance_criteria {
        println!("\nAcceptance criteria:\n{criteria}");
    }
    if let Some(notes) = &issue.notes {
        println!("\nNotes:\n{notes}");
    }
    if !issue.labels.is_empty() {
        println!("\nLabels: {}", issue.labels.join(", "));
    }
    if !issue.dependencies.is_empty() {
        println!("\nDependencies:");
        for dep in &issue.dependencies {
            println!("  {} {}", dep.dep_type, dep.depends_on_id);
        }
    }
    if !issue.comments.is_empty() {
        println!("\nComments:");
        for comment in &issue.comments {
            println!("  [{}] {}: {}", comment.created_at, comment.author, comment.body);
        }
    }

    if args.events {
        println!("\nHistory:");
        for event in ctx.storage.get_events(&args.id)? {
            println!(
                "  [{}] {} by {}{}",
                event.created_at,
                event.event_type.as_str(),
                event.actor,
                event
                    .comment
                    .as_deref()
                    .map(|c| format!(": {c}"))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}
