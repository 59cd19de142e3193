//! `bd sync` - manual import/export and the pre-pull snapshot hook.
//!
//! Wire `bd sync --pull-start` before `git pull` (or from a Git hook) so
//! the deletion reconciler has a left snapshot to compare against.

use crate::cli::context::AppContext;
use crate::cli::SyncArgs;
use crate::error::Result;
use crate::sync::snapshot;

pub fn execute(args: &SyncArgs, ctx: &mut AppContext) -> Result<()> {
    let mut did_something = false;

    if args.pull_start {
        // Flush first so the snapshot reflects every local change.
        let outcome = ctx.manual_flush(false)?;
        if outcome.flushed {
            println!("Flushed {} issue(s) before pull", outcome.exported);
        }
        // Workspaces that predate snapshot tracking get their base seeded
        // from the pre-pull state.
        snapshot::initialize_snapshots_if_needed(&ctx.paths)?;
        snapshot::capture_left_snapshot(&ctx.paths)?;
        println!("Captured pre-pull snapshot");
        did_something = true;
    }

    if args.import {
        // The auto-import on context open may have been gated out by the
        // hash; a forced import here is still cheap for unchanged content.
        ctx.storage
            .delete_metadata(crate::sync::METADATA_LAST_IMPORT_HASH)?;
        match crate::sync::auto_import(&mut ctx.storage, &ctx.paths, &ctx.actor.clone())? {
            crate::sync::ImportOutcome::Imported(result) => {
                println!(
                    "Imported: {} created, {} updated, {} unchanged, {} deleted, {} remapped",
                    result.created,
                    result.updated,
                    result.unchanged,
                    result.deleted,
                    result.remapped.len()
                );
                if result.needs_full_export() {
                    ctx.mark_id_changed();
                } else if result.needs_flush() {
                    ctx.mark_mutated();
                }
            }
            crate::sync::ImportOutcome::NoFile => println!("No JSONL file to import."),
            crate::sync::ImportOutcome::Unchanged => println!("Already up to date."),
        }
        did_something = true;
    }

    if args.flush || args.full || !did_something {
        let outcome = ctx.manual_flush(args.full)?;
        if outcome.flushed {
            println!(
                "Exported {} issue(s) ({} line(s) total)",
                outcome.exported, outcome.total
            );
        } else {
            println!("Nothing to export.");
        }
    }

    Ok(())
}
