//! `bd label` - label management.

use crate::cli::context::AppContext;
use crate::cli::LabelCommands;
use crate::error::Result;

pub fn execute(command: &LabelCommands, ctx: &mut AppContext) -> Result<()> {
    match command {
        LabelCommands::Add { id, label } => {
            let added = ctx.storage.add_label(id, label, &ctx.actor.clone())?;
            if added {
                ctx.mark_mutated();
                println!("Labeled {id} with '{label}'");
            } else {
                println!("{id} already has '{label}'");
            }
        }
        LabelCommands::Remove { id, label } => {
            let removed = ctx.storage.remove_label(id, label, &ctx.actor.clone())?;
            if removed {
                ctx.mark_mutated();
                println!("Removed '{label}' from {id}");
            } else {
                println!("{id} does not have '{label}'");
            }
        }
        LabelCommands::List { id } => {
            let labels = ctx.storage.get_labels(id)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&labels)?);
            } else if labels.is_empty() {
                println!("No labels on {id}.");
            } else {
                println!("{}", labels.join(", "));
            }
        }
    }
    Ok(())
}
