//! Base/left snapshots and three-way deletion reconciliation.
//!
//! When clone A deletes an issue, exports, and pushes, clone B's pull leaves
//! B's database still holding the issue while the JSONL omits it. A naive
//! import would re-create it. The reconciler compares three states:
//!
//! - `base`  - the JSONL B last imported successfully
//! - `left`  - the JSONL B exported just before the pull
//! - `right` - the JSONL on disk now (post-pull)
//!
//! An ID present in base but absent in right is an accepted deletion when
//! B made no local change since the last import (base line == left line),
//! and a conflict otherwise. Conflicts abort the import; nothing is deleted
//! silently.

use crate::config::WorkspacePaths;
use crate::error::{BeadsError, Result};
use crate::storage::SqliteStorage;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Deletions applied by one reconciliation pass.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
}

/// Bootstrap the base snapshot from the current JSONL on first run.
///
/// # Errors
///
/// Returns an error if the copy fails.
pub fn initialize_snapshots_if_needed(paths: &WorkspacePaths) -> Result<()> {
    let base = paths.base_snapshot_path();
    if !base.exists() && paths.jsonl_path.exists() {
        fs::copy(&paths.jsonl_path, &base)?;
        tracing::debug!(path = %base.display(), "initialized base snapshot");
    }
    Ok(())
}

/// Record the local export state just before external modification (the
/// pre-pull hook of `bd sync`).
///
/// # Errors
///
/// Returns an error if the copy fails.
pub fn capture_left_snapshot(paths: &WorkspacePaths) -> Result<()> {
    let left = paths.left_snapshot_path();
    if paths.jsonl_path.exists() {
        fs::copy(&paths.jsonl_path, &left)?;
    } else {
        fs::write(&left, b"")?;
    }
    Ok(())
}

/// Record the post-merge state as the new common ancestor.
///
/// # Errors
///
/// Returns an error if the copy fails.
pub fn update_base_snapshot(paths: &WorkspacePaths) -> Result<()> {
    let base = paths.base_snapshot_path();
    if paths.jsonl_path.exists() {
        fs::copy(&paths.jsonl_path, &base)?;
    } else {
        fs::write(&base, b"")?;
    }
    Ok(())
}

/// Apply remote deletions, refusing when they clash with local edits.
///
/// `right_ids` is the ID set of the freshly-pulled JSONL. For every ID in
/// base that is absent from right: unchanged locally (raw base line equals
/// raw left line) means the remote deletion is accepted and the row is
/// removed; a differing left line is a conflict. When no left snapshot was
/// captured (pull without the pre-pull hook), the live database row stands
/// in for left, compared by timestamp-stripped content hash. Any conflict
/// aborts before a single deletion is applied.
///
/// # Errors
///
/// Returns `DeletionConflict` listing every conflicted ID, or a storage
/// error from the deletes.
pub fn reconcile_deletions(
    storage: &mut SqliteStorage,
    right_ids: &HashSet<String>,
    paths: &WorkspacePaths,
    actor: &str,
) -> Result<DeletionReport> {
    let base = read_raw_lines(&paths.base_snapshot_path())?;
    if base.is_empty() {
        return Ok(DeletionReport::default());
    }
    let left_path = paths.left_snapshot_path();
    let have_left = left_path.exists();
    let left = read_raw_lines(&left_path)?;

    let mut accepted: Vec<String> = Vec::new();
    let mut conflicts: Vec<String> = Vec::new();

    for (id, base_line) in &base {
        if right_ids.contains(id) {
            continue; // Normal content reconciliation handles it.
        }
        if have_left {
            match left.get(id) {
                Some(left_line) if left_line == base_line => accepted.push(id.clone()),
                // Absent from left as well: already deleted locally.
                None => {}
                Some(_) => conflicts.push(id.clone()),
            }
        } else {
            // No pre-pull snapshot: the live row stands in for left.
            let Some(local) = storage.get_issue_full(id)? else {
                continue;
            };
            let base_unchanged = serde_json::from_str::<crate::model::Issue>(base_line)
                .is_ok_and(|base_issue| {
                    crate::util::content_hash(&base_issue) == crate::util::content_hash(&local)
                });
            if base_unchanged {
                accepted.push(id.clone());
            } else {
                conflicts.push(id.clone());
            }
        }
    }

    if !conflicts.is_empty() {
        conflicts.sort();
        return Err(BeadsError::DeletionConflict { ids: conflicts });
    }

    let mut report = DeletionReport::default();
    accepted.sort();
    for id in accepted {
        if storage.get_issue(&id)?.is_some() {
            storage.delete_issue(&id, actor)?;
            tracing::info!(id = %id, "accepted remote deletion");
            report.deleted.push(id);
        }
    }

    Ok(report)
}

/// Read a snapshot into an `id -> raw line` map. Missing file is empty.
/// Lines without a parseable `id` are ignored; snapshots are regenerable.
fn read_raw_lines(path: &Path) -> Result<BTreeMap<String, String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(BeadsError::Io(e)),
    };
    let reader = BufReader::new(file);

    let mut map = BTreeMap::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                map.insert(id.to_string(), line);
            }
        }
    }
    Ok(map)
}
