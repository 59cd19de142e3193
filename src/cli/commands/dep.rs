//! `bd dep` - dependency management and graph views.

use crate::cli::commands::issue_line;
use crate::cli::context::AppContext;
use crate::cli::DepCommands;
use crate::error::Result;
use crate::model::Dependency;
use serde_json::json;

pub fn execute(command: &DepCommands, ctx: &mut AppContext) -> Result<()> {
    match command {
        DepCommands::Add {
            issue_id,
            depends_on_id,
            dep_type,
        } => {
            if let Some(result) = ctx.try_daemon(
                "dep_add",
                json!({"issue_id": issue_id, "depends_on_id": depends_on_id, "type": dep_type}),
            ) {
                result?;
                println!("{issue_id} now depends on {depends_on_id}");
                return Ok(());
            }

            let dep = Dependency {
                issue_id: issue_id.clone(),
                depends_on_id: depends_on_id.clone(),
                dep_type: dep_type.parse()?,
            };
            ctx.storage.add_dependency(&dep, &ctx.actor.clone())?;
            ctx.mark_mutated();
            println!("{issue_id} now depends on {depends_on_id}");
        }
        DepCommands::Remove {
            issue_id,
            depends_on_id,
        } => {
            if let Some(result) = ctx.try_daemon(
                "dep_remove",
                json!({"issue_id": issue_id, "depends_on_id": depends_on_id}),
            ) {
                result?;
                println!("Removed {issue_id} -> {depends_on_id}");
                return Ok(());
            }

            ctx.storage
                .remove_dependency(issue_id, depends_on_id, &ctx.actor.clone())?;
            ctx.mark_mutated();
            println!("Removed {issue_id} -> {depends_on_id}");
        }
        DepCommands::Tree {
            id,
            max_depth,
            all_paths,
        } => {
            let tree = ctx.storage.get_dependency_tree(id, *max_depth, *all_paths)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
                return Ok(());
            }
            for node in &tree {
                let marker = if node.truncated { " …" } else { "" };
                println!(
                    "{:indent$}{}{marker}",
                    "",
                    issue_line(&node.issue),
                    indent = node.depth * 2
                );
            }
        }
        DepCommands::Cycles => {
            let cycles = ctx.storage.detect_cycles()?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&cycles)?);
                return Ok(());
            }
            if cycles.is_empty() {
                println!("No cycles.");
                return Ok(());
            }
            for (n, cycle) in cycles.iter().enumerate() {
                let ids: Vec<&str> = cycle.iter().map(|i| i.id.as_str()).collect();
                println!("Cycle {}: {}", n + 1, ids.join(" -> "));
            }
        }
    }
    Ok(())
}
