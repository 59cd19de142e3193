//! `bd comment` - add and list comments.

use crate::cli::context::AppContext;
use crate::cli::CommentCommands;
use crate::error::Result;
use serde_json::json;

pub fn execute(command: &CommentCommands, ctx: &mut AppContext) -> Result<()> {
    match command {
        CommentCommands::Add { id, text, author } => {
            if let Some(result) = ctx.try_daemon(
                "comment_add",
                json!({"id": id, "text": text, "author": author}),
            ) {
                result?;
                println!("Commented on {id}");
                return Ok(());
            }

            let author = author.clone().unwrap_or_else(|| ctx.actor.clone());
            ctx.storage.add_comment(id, &author, text)?;
            ctx.mark_mutated();
            println!("Commented on {id}");
        }
        CommentCommands::List { id } => {
            let comments = ctx.storage.get_comments(id)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&comments)?);
                return Ok(());
            }
            if comments.is_empty() {
                println!("No comments on {id}.");
                return Ok(());
            }
            for comment in &comments {
                println!("[{}] {}: {}", comment.created_at, comment.author, comment.body);
            }
        }
    }
    Ok(())
}
