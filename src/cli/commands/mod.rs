//! Command handlers. Each module exposes `execute`, taking the parsed
//! arguments and the invocation context.

pub mod blocked;
pub mod close;
pub mod comment;
pub mod config_cmd;
pub mod create;
pub mod daemon_cmd;
pub mod delete;
pub mod dep;
pub mod doctor;
pub mod epic;
pub mod init;
pub mod label;
pub mod list;
pub mod ready;
pub mod rename_prefix;
pub mod search;
pub mod show;
pub mod stats;
pub mod sync_cmd;
pub mod update;

use crate::model::Issue;

/// One-line issue rendering shared by the listing commands.
#[must_use]
pub fn issue_line(issue: &Issue) -> String {
    let assignee = issue
        .assignee
        .as_deref()
        .map(|a| format!(" @{a}"))
        .unwrap_or_default();
    format!(
        "{:<10} {} [{}] {}{}",
        issue.id, issue.priority, issue.status, issue.title, assignee
    )
}

/// Print a list of issues in the selected format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_issues(issues: &[Issue], json: bool) -> crate::error::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(issues)?);
    } else if issues.is_empty() {
        println!("No issues.");
    } else {
        for issue in issues {
            println!("{}", issue_line(issue));
        }
    }
    Ok(())
}
