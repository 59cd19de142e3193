//! `bd epic` - epic child rollups.

use crate::cli::context::AppContext;
use crate::cli::EpicCommands;
use crate::error::Result;
use serde_json::json;

pub fn execute(command: &EpicCommands, ctx: &AppContext) -> Result<()> {
    match command {
        EpicCommands::Status { id } => {
            if let Some(result) = ctx.try_daemon("epic_status", json!({"id": id})) {
                let data = result?;
                print_status(&data, ctx.json)?;
                return Ok(());
            }

            let status = ctx.storage.get_epic_status(id)?;
            print_status(&serde_json::to_value(&status)?, ctx.json)?;
        }
    }
    Ok(())
}

fn print_status(data: &serde_json::Value, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
        return Ok(());
    }
    let closed = data["closed_children"].as_u64().unwrap_or(0);
    let total = data["total_children"].as_u64().unwrap_or(0);
    let id = data["epic"]["id"].as_str().unwrap_or("?");
    println!("{id}: {closed}/{total} children closed");
    if data["eligible_for_close"].as_bool() == Some(true) {
        println!("All children closed; the epic can be closed.");
    }
    Ok(())
}
