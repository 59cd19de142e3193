//! `bd blocked` - issues gated by open predecessors.

use crate::cli::commands::issue_line;
use crate::cli::context::AppContext;
use crate::error::Result;

pub fn execute(ctx: &AppContext) -> Result<()> {
    let blocked = ctx.storage.get_blocked_issues()?;

    if ctx.json {
        let rows: Vec<serde_json::Value> = blocked
            .iter()
            .map(|(issue, blockers)| {
                serde_json::json!({"issue": issue, "blocked_by": blockers})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if blocked.is_empty() {
        println!("Nothing is blocked.");
        return Ok(());
    }
    for (issue, blockers) in &blocked {
        println!("{}", issue_line(issue));
        println!("    blocked by: {}", blockers.join(", "));
    }
    Ok(())
}
