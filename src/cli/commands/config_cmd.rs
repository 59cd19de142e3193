//! `bd config` - workspace configuration key/value store.

use crate::cli::context::AppContext;
use crate::cli::ConfigCommands;
use crate::error::{BeadsError, Result};

pub fn execute(command: &ConfigCommands, ctx: &mut AppContext) -> Result<()> {
    match command {
        ConfigCommands::Get { key } => {
            let value = ctx
                .storage
                .get_config(key)?
                .ok_or_else(|| BeadsError::validation("key", format!("'{key}' is not set")))?;
            println!("{value}");
        }
        ConfigCommands::Set { key, value } => {
            ctx.storage.set_config(key, value)?;
            println!("{key} = {value}");
        }
        ConfigCommands::Unset { key } => {
            if ctx.storage.delete_config(key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigCommands::List => {
            let all = ctx.storage.get_all_config()?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&all)?);
                return Ok(());
            }
            let mut keys: Vec<&String> = all.keys().collect();
            keys.sort();
            for key in keys {
                println!("{key} = {}", all[key]);
            }
        }
    }
    Ok(())
}
