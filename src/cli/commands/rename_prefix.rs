//! `bd rename-prefix` - workspace-wide prefix rename.
//!
//! Rewrites every issue ID, all relational references, free-text
//! references, the dependency table (including dangling cross-repo
//! endpoints), the counter, and the configured prefix. Only a full export
//! can represent the result.

use crate::cli::context::AppContext;
use crate::cli::RenamePrefixArgs;
use crate::error::Result;
use crate::storage::META_ISSUE_PREFIX;
use crate::sync::collision::rewrite_store_references;
use crate::util::{format_id, parse_id, validate_prefix};
use std::collections::HashMap;

pub fn execute(args: &RenamePrefixArgs, ctx: &mut AppContext) -> Result<()> {
    validate_prefix(&args.new_prefix)?;
    let actor = ctx.actor.clone();

    let mut mapping: HashMap<String, String> = HashMap::new();
    for id in ctx.storage.get_all_ids()? {
        if let Ok(parsed) = parse_id(&id) {
            if parsed.prefix == args.old_prefix {
                mapping.insert(id, format_id(&args.new_prefix, parsed.number));
            }
        }
    }

    let mut ordered: Vec<(&String, &String)> = mapping.iter().collect();
    ordered.sort();
    for (old_id, new_id) in ordered {
        ctx.storage.update_issue_id(old_id, new_id, &actor)?;
    }

    rewrite_store_references(&mut ctx.storage, &mapping, &actor)?;

    // Dangling endpoints (e.g. references into repos not checked out here)
    // follow the prefix too.
    ctx.storage
        .rename_dependency_prefix(&args.old_prefix, &args.new_prefix, &actor)?;
    ctx.storage
        .rename_counter_prefix(&args.old_prefix, &args.new_prefix)?;

    if ctx.storage.get_metadata(META_ISSUE_PREFIX)?.as_deref() == Some(args.old_prefix.as_str()) {
        ctx.storage
            .set_metadata(META_ISSUE_PREFIX, &args.new_prefix)?;
    }

    ctx.mark_id_changed();
    println!(
        "Renamed {} issue(s) from '{}' to '{}'",
        mapping.len(),
        args.old_prefix,
        args.new_prefix
    );
    Ok(())
}
