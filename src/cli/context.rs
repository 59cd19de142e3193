//! Per-invocation application context.
//!
//! One explicit context threaded through command handlers: resolved paths,
//! the open store, actor attribution, and flush scheduling. Opening the
//! context runs the hash-gated auto-import, so every command sees the
//! latest JSONL state that did not conflict with local work; finishing it
//! runs the auto-flush, so every committed change reaches the JSONL before
//! the process exits.

use crate::cli::Cli;
use crate::config::{self, WorkspacePaths};
use crate::daemon::client::{self, DaemonClient};
use crate::error::Result;
use crate::storage::SqliteStorage;
use crate::sync::{self, flush::FlushState, ImportOutcome};
use serde_json::Value;
use std::path::Path;

pub struct AppContext {
    pub paths: WorkspacePaths,
    pub storage: SqliteStorage,
    pub actor: String,
    pub json: bool,
    no_daemon: bool,
    no_auto_flush: bool,
    flush: FlushState,
}

impl AppContext {
    /// Resolve the workspace, open the store, and auto-import.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` outside a workspace, plus any import error
    /// (conflict markers and deletion conflicts surface here, before the
    /// command reads issues).
    pub fn open(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::open_at(cli, &cwd)
    }

    /// As [`AppContext::open`], anchored at an explicit directory.
    ///
    /// # Errors
    ///
    /// See [`AppContext::open`].
    pub fn open_at(cli: &Cli, dir: &Path) -> Result<Self> {
        let paths = config::resolve_paths(dir, cli.db.as_deref())?;
        let storage = SqliteStorage::open(&paths.db_path)?;
        let actor = cli.actor.clone().unwrap_or_else(config::resolve_actor);

        let mut ctx = Self {
            paths,
            storage,
            actor,
            json: cli.json,
            no_daemon: cli.no_daemon || config::no_daemon(),
            no_auto_flush: cli.no_auto_flush,
            flush: FlushState::new(),
        };

        match sync::auto_import(&mut ctx.storage, &ctx.paths, &ctx.actor)? {
            ImportOutcome::Imported(result) => {
                if result.needs_full_export() {
                    ctx.flush.mark_dirty_and_schedule_full_export();
                } else if result.needs_flush() {
                    ctx.flush.mark_dirty_and_schedule_flush();
                }
                if !result.remapped.is_empty() {
                    for (old, new) in &result.remapped {
                        tracing::warn!("ID collision: {old} remapped to {new}");
                    }
                }
            }
            ImportOutcome::NoFile | ImportOutcome::Unchanged => {}
        }

        Ok(ctx)
    }

    /// Record that the command mutated the store.
    pub fn mark_mutated(&mut self) {
        self.flush.mark_dirty_and_schedule_flush();
    }

    /// Record a mutation only an ID rewrite can represent.
    pub fn mark_id_changed(&mut self) {
        self.flush.mark_dirty_and_schedule_full_export();
    }

    /// Flush on the way out. In direct mode the debounce degenerates to
    /// exactly one flush at process exit. Failures warn and keep the dirty
    /// state; they never fail the command that did the real work.
    pub fn finish(&mut self) {
        if self.no_auto_flush || !self.flush.is_dirty() {
            return;
        }
        let Self {
            storage,
            paths,
            flush,
            ..
        } = self;
        if let Err(e) = flush.run(storage, paths) {
            tracing::warn!("auto-flush failed (changes are safe in the database): {e}");
        }
    }

    /// Try an RPC against a running daemon. `None` means "do it directly":
    /// no daemon, forced direct mode, or the daemon answered
    /// `unknown operation`. A real daemon-side failure is an `Err`.
    pub fn try_daemon(&self, op: &str, args: Value) -> Option<Result<Value>> {
        if self.no_daemon {
            return None;
        }
        let mut daemon = DaemonClient::connect(&self.paths)?;
        match daemon.call(op, args) {
            Ok(data) => Some(Ok(data)),
            Err(e) if client::is_unknown_operation(&e) => {
                tracing::debug!("daemon does not know op '{op}', going direct");
                None
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Manual export path (`bd sync --flush`): clears the backoff state.
    ///
    /// # Errors
    ///
    /// Returns the export error, unlike the auto path.
    pub fn manual_flush(&mut self, full: bool) -> Result<sync::flush::FlushOutcome> {
        self.flush.reset();
        let outcome = sync::flush::auto_flush(&mut self.storage, &self.paths, full)?;
        Ok(outcome)
    }
}
