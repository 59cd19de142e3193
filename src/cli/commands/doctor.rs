//! `bd doctor` - workspace diagnostics.

use crate::cli::context::AppContext;
use crate::error::Result;
use crate::util::parse_id;
use serde_json::json;
use std::collections::HashMap;

pub fn execute(ctx: &AppContext) -> Result<()> {
    let mut findings: Vec<String> = Vec::new();

    let issue_count = ctx.storage.count_issues()?;

    // Counter consistency: every prefix counter must cover its max suffix.
    let mut max_by_prefix: HashMap<String, u64> = HashMap::new();
    for id in ctx.storage.get_all_ids()? {
        if let Ok(parsed) = parse_id(&id) {
            let entry = max_by_prefix.entry(parsed.prefix).or_insert(0);
            *entry = (*entry).max(parsed.number);
        } else {
            findings.push(format!("malformed issue ID: {id}"));
        }
    }
    for (prefix, max_number) in &max_by_prefix {
        let counter = ctx.storage.get_counter(prefix)?.unwrap_or(0);
        if counter < *max_number {
            findings.push(format!(
                "counter for '{prefix}' is {counter}, behind live max {max_number} (run 'bd sync --import' to repair)"
            ));
        }
    }

    // Dangling dependency endpoints.
    let mut orphan_edges = 0;
    for dep in ctx.storage.all_dependency_records()? {
        if !ctx.storage.id_exists(&dep.issue_id)? || !ctx.storage.id_exists(&dep.depends_on_id)? {
            orphan_edges += 1;
        }
    }
    if orphan_edges > 0 {
        findings.push(format!("{orphan_edges} orphaned dependency edge(s)"));
    }

    // Cycles that slipped in through imports.
    let cycles = ctx.storage.detect_cycles()?;
    if !cycles.is_empty() {
        findings.push(format!("{} dependency cycle(s)", cycles.len()));
    }

    // Issues that will stay dirty until a content change (timestamp-only).
    let timestamp_only = ctx.storage.count_timestamp_only_dirty()?;
    let dirty = ctx.storage.get_dirty_issue_ids()?.len();

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "issues": issue_count,
                "dirty": dirty,
                "timestamp_only_dirty": timestamp_only,
                "orphan_edges": orphan_edges,
                "cycles": cycles.len(),
                "findings": findings,
            }))?
        );
        return Ok(());
    }

    println!("Issues: {issue_count} ({dirty} dirty, {timestamp_only} timestamp-only dirty)");
    if findings.is_empty() {
        println!("No problems found.");
    } else {
        for finding in &findings {
            println!("warning: {finding}");
        }
    }
    Ok(())
}
