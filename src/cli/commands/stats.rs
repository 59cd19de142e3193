//! `bd stats` - workspace counts.

use crate::cli::context::AppContext;
use crate::error::Result;
use crate::model::Status;
use crate::storage::{ListFilters, ReadyFilters, SortPolicy};
use serde_json::json;

pub fn execute(ctx: &AppContext) -> Result<()> {
    if let Some(result) = ctx.try_daemon("stats", json!({})) {
        let data = result?;
        print_stats(&data, ctx.json);
        return Ok(());
    }

    let all = ctx.storage.list_issues(&ListFilters {
        include_closed: true,
        ..ListFilters::default()
    })?;
    let ready = ctx
        .storage
        .get_ready_work(&ReadyFilters::default(), SortPolicy::default())?;
    let blocked = ctx.storage.get_blocked_issues()?;

    let count = |status: Status| all.iter().filter(|i| i.status == status).count();
    let data = json!({
        "total": all.len(),
        "open": count(Status::Open),
        "in_progress": count(Status::InProgress),
        "blocked_status": count(Status::Blocked),
        "closed": count(Status::Closed),
        "ready": ready.len(),
        "blocked": blocked.len(),
    });
    print_stats(&data, ctx.json);
    Ok(())
}

fn print_stats(data: &serde_json::Value, json: bool) {
    if json {
        println!("{data:#}");
        return;
    }
    println!(
        "{} issues: {} open, {} in progress, {} closed | {} ready, {} blocked",
        data["total"], data["open"], data["in_progress"], data["closed"], data["ready"],
        data["blocked"]
    );
}
