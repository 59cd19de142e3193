//! Workspace discovery, persisted paths, and environment configuration.
//!
//! The workspace anchor is a `.beads/` directory found by walking up from
//! the current directory. `BEADS_DB` and `BEADS_JSONL` override the database
//! and JSONL locations; everything else (snapshots, lock, pid, socket) is
//! derived from the `.beads/` directory.

use crate::error::{BeadsError, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name that anchors a workspace.
pub const BEADS_DIR_NAME: &str = ".beads";

/// Default database file name inside `.beads/`.
pub const DB_FILE_NAME: &str = "issues.db";

/// Default JSONL file name inside `.beads/`.
pub const JSONL_FILE_NAME: &str = "issues.jsonl";

/// Legacy JSONL name, honored on discovery when it is the only one present.
pub const LEGACY_JSONL_FILE_NAME: &str = "beads.jsonl";

/// Default auto-flush debounce for direct-mode commands.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_secs(5);

/// Debounce used by the daemon for both import and export.
pub const DAEMON_DEBOUNCE: Duration = Duration::from_millis(500);

/// Resolved file locations for one workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub beads_dir: PathBuf,
    pub db_path: PathBuf,
    pub jsonl_path: PathBuf,
}

impl WorkspacePaths {
    /// Snapshot of the last successfully imported JSONL.
    #[must_use]
    pub fn base_snapshot_path(&self) -> PathBuf {
        self.beads_dir.join("beads.base.jsonl")
    }

    /// Snapshot of the local export captured just before a pull.
    #[must_use]
    pub fn left_snapshot_path(&self) -> PathBuf {
        self.beads_dir.join("beads.left.jsonl")
    }

    /// Staging file for a three-way merge result.
    #[must_use]
    pub fn merged_path(&self) -> PathBuf {
        let mut name = self.jsonl_path.as_os_str().to_owned();
        name.push(".merged");
        PathBuf::from(name)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.beads_dir.join("daemon.lock")
    }

    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.beads_dir.join("daemon.pid")
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.beads_dir.join("bd.sock")
    }
}

/// Walk up from `start` looking for a `.beads` directory.
///
/// # Errors
///
/// Returns `NotInitialized` when no workspace is found, and
/// `NestedWorkspace` when the found `.beads` sits inside another `.beads`.
pub fn discover_beads_dir(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(BEADS_DIR_NAME);
        if candidate.is_dir() {
            reject_nested(&candidate)?;
            return Ok(candidate);
        }
    }
    Err(BeadsError::NotInitialized)
}

/// A `.beads` directory nested inside another `.beads` tree is a broken
/// checkout; refuse to operate on it.
fn reject_nested(beads_dir: &Path) -> Result<()> {
    for ancestor in beads_dir.ancestors().skip(1) {
        if ancestor.file_name().is_some_and(|n| n == BEADS_DIR_NAME) {
            return Err(BeadsError::NestedWorkspace {
                path: beads_dir.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Resolve all workspace paths for a command invocation.
///
/// `BEADS_DB` wins over discovery; its parent directory becomes the
/// workspace anchor. `BEADS_JSONL` wins over the sibling default.
///
/// # Errors
///
/// Returns `NotInitialized` if no workspace can be located.
pub fn resolve_paths(start: &Path, db_override: Option<&Path>) -> Result<WorkspacePaths> {
    let db_path = match db_override {
        Some(p) => p.to_path_buf(),
        None => match env::var_os("BEADS_DB") {
            Some(p) => PathBuf::from(p),
            None => discover_beads_dir(start)?.join(DB_FILE_NAME),
        },
    };

    let beads_dir = db_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let jsonl_path = match env::var_os("BEADS_JSONL") {
        Some(p) => PathBuf::from(p),
        None => discover_jsonl(&beads_dir),
    };

    Ok(WorkspacePaths {
        beads_dir,
        db_path,
        jsonl_path,
    })
}

/// Pick the JSONL file inside a beads directory.
///
/// Prefers `issues.jsonl`; falls back to the legacy `beads.jsonl` when only
/// that exists (old repos committed the legacy name to Git).
#[must_use]
pub fn discover_jsonl(beads_dir: &Path) -> PathBuf {
    let preferred = beads_dir.join(JSONL_FILE_NAME);
    if preferred.exists() {
        return preferred;
    }
    let legacy = beads_dir.join(LEGACY_JSONL_FILE_NAME);
    if legacy.exists() {
        return legacy;
    }
    preferred
}

/// Per-user workspace for the global daemon (`~/.beads`).
#[must_use]
pub fn global_beads_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(BEADS_DIR_NAME))
}

/// Auto-flush debounce: `BEADS_FLUSH_DEBOUNCE` (milliseconds) or 5 s.
#[must_use]
pub fn flush_debounce() -> Duration {
    flush_debounce_or(DEFAULT_FLUSH_DEBOUNCE)
}

/// As [`flush_debounce`], with the caller's default (the daemon runs a
/// tighter loop than direct-mode commands).
#[must_use]
pub fn flush_debounce_or(default: Duration) -> Duration {
    env::var("BEADS_FLUSH_DEBOUNCE")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// `BEADS_NO_DAEMON` forces direct mode.
#[must_use]
pub fn no_daemon() -> bool {
    env_flag("BEADS_NO_DAEMON")
}

/// `BEADS_PREFER_GLOBAL_DAEMON` tries the per-user daemon after the
/// workspace one.
#[must_use]
pub fn prefer_global_daemon() -> bool {
    env_flag("BEADS_PREFER_GLOBAL_DAEMON")
}

/// Polling fallback for environments without a working native watcher.
/// `BEADS_WATCHER_FALLBACK=false|0` disables it.
#[must_use]
pub fn watcher_fallback_enabled() -> bool {
    match env::var("BEADS_WATCHER_FALLBACK") {
        Ok(v) => !matches!(v.as_str(), "false" | "0"),
        Err(_) => true,
    }
}

/// Actor attribution for audit events: `BD_ACTOR`, then `USER`.
#[must_use]
pub fn resolve_actor() -> String {
    env::var("BD_ACTOR")
        .or_else(|_| env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => !matches!(v.as_str(), "" | "false" | "0"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn discover_walks_up() {
        let temp = TempDir::new().unwrap();
        let beads = temp.path().join(".beads");
        fs::create_dir(&beads).unwrap();
        let nested = temp.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let found = discover_beads_dir(&nested).unwrap();
        assert_eq!(found.canonicalize().unwrap(), beads.canonicalize().unwrap());
    }

    #[test]
    fn discover_fails_without_workspace() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            discover_beads_dir(temp.path()),
            Err(BeadsError::NotInitialized)
        ));
    }

    #[test]
    fn nested_workspace_rejected() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join(".beads/.beads");
        fs::create_dir_all(&nested).unwrap();

        assert!(matches!(
            discover_beads_dir(&nested.join("deeper")),
            Err(BeadsError::NestedWorkspace { .. })
        ));
    }

    #[test]
    fn legacy_jsonl_honored_when_alone() {
        let temp = TempDir::new().unwrap();
        let beads = temp.path().join(".beads");
        fs::create_dir(&beads).unwrap();

        // Neither exists: default name
        assert_eq!(discover_jsonl(&beads), beads.join("issues.jsonl"));

        // Only the legacy file: keep it
        fs::write(beads.join("beads.jsonl"), "").unwrap();
        assert_eq!(discover_jsonl(&beads), beads.join("beads.jsonl"));

        // Both: the preferred name wins
        fs::write(beads.join("issues.jsonl"), "").unwrap();
        assert_eq!(discover_jsonl(&beads), beads.join("issues.jsonl"));
    }
}
