//! `bd init` - bootstrap a workspace.

use crate::cli::InitArgs;
use crate::config::{BEADS_DIR_NAME, DB_FILE_NAME};
use crate::error::{BeadsError, Result};
use crate::storage::{SqliteStorage, META_BD_VERSION, META_ISSUE_PREFIX};
use crate::util::validate_prefix;
use std::fs;
use std::path::Path;

pub fn execute(args: &InitArgs) -> Result<()> {
    let cwd = std::env::current_dir()?;
    execute_at(args, &cwd)
}

pub fn execute_at(args: &InitArgs, dir: &Path) -> Result<()> {
    validate_prefix(&args.prefix)?;

    let beads_dir = dir.join(BEADS_DIR_NAME);
    if beads_dir.exists() && !args.force {
        return Err(BeadsError::AlreadyInitialized { path: beads_dir });
    }
    // Refuse to nest a workspace inside another workspace's .beads tree.
    for ancestor in dir.ancestors() {
        if ancestor.file_name().is_some_and(|n| n == BEADS_DIR_NAME) {
            return Err(BeadsError::NestedWorkspace {
                path: beads_dir.clone(),
            });
        }
    }

    fs::create_dir_all(&beads_dir)?;
    let db_path = beads_dir.join(DB_FILE_NAME);
    let mut storage = SqliteStorage::open(&db_path)?;
    storage.set_metadata(META_ISSUE_PREFIX, &args.prefix)?;
    storage.set_metadata(META_BD_VERSION, env!("CARGO_PKG_VERSION"))?;

    println!(
        "Initialized beads workspace at {} (prefix '{}')",
        beads_dir.display(),
        args.prefix
    );
    Ok(())
}
