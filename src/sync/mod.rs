//! The synchronization engine: hash-gated auto-import, collision
//! resolution, debounced auto-flush, and three-way deletion reconciliation.
//!
//! The JSONL committed to Git is the shared source of truth; the SQLite
//! mirror is the authoritative live copy. Auto-import moves JSONL changes
//! into the store without overwriting local work; auto-flush moves dirty
//! rows back out. Both are idempotent and safe to re-run.

pub mod collision;
pub mod flush;
pub mod snapshot;

use crate::config::WorkspacePaths;
use crate::error::{BeadsError, Result};
use crate::jsonl;
use crate::model::{Issue, Status};
use crate::storage::{IssueUpdate, SqliteStorage};
use crate::util::sha256_hex;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Metadata key: SHA-256 of the JSONL bytes last imported (or last written
/// by a flush, which is the same content).
pub const METADATA_LAST_IMPORT_HASH: &str = "last_import_hash";

/// Metadata key: RFC 3339 time of the last successful import.
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";

const CONFLICT_START: &str = "<<<<<<< ";
const CONFLICT_SEPARATOR: &str = "=======";
const CONFLICT_END: &str = ">>>>>>> ";

/// What one auto-import pass did.
#[derive(Debug)]
pub enum ImportOutcome {
    /// The JSONL file does not exist.
    NoFile,
    /// The hash gate matched; nothing was read beyond metadata.
    Unchanged,
    /// The JSONL was reconciled into the store.
    Imported(ImportResult),
}

/// Detail for an [`ImportOutcome::Imported`].
#[derive(Debug, Default)]
pub struct ImportResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub orphan_edges_removed: usize,
    /// Collision remaps applied, `old -> new`.
    pub remapped: HashMap<String, String>,
}

impl ImportResult {
    /// An ID remap cannot be represented by an incremental export; the
    /// whole file must be rewritten.
    #[must_use]
    pub fn needs_full_export(&self) -> bool {
        !self.remapped.is_empty()
    }

    /// Anything material changed; an incremental flush should follow.
    #[must_use]
    pub fn needs_flush(&self) -> bool {
        self.created + self.updated + self.deleted + self.orphan_edges_removed > 0
            || !self.remapped.is_empty()
    }
}

/// A Git merge-conflict marker found in the JSONL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    pub line: usize,
    pub text: String,
}

/// Scan content for merge-conflict markers at line start.
#[must_use]
pub fn scan_conflict_markers(content: &str) -> Vec<ConflictMarker> {
    let mut markers = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        if line.starts_with(CONFLICT_START)
            || line.starts_with(CONFLICT_SEPARATOR)
            || line.starts_with(CONFLICT_END)
        {
            markers.push(ConflictMarker {
                line: line_num + 1,
                text: line.chars().take(40).collect(),
            });
        }
    }
    markers
}

/// Fail when the content still carries conflict markers: the file came out
/// of Git and must be resolved by the user, never by us.
///
/// # Errors
///
/// Returns `MergeConflict` describing the first few markers.
pub fn ensure_no_conflict_markers(content: &str, path: &Path) -> Result<()> {
    let markers = scan_conflict_markers(content);
    if markers.is_empty() {
        return Ok(());
    }

    let preview: Vec<String> = markers
        .iter()
        .take(5)
        .map(|m| format!("line {}: {}", m.line, m.text))
        .collect();

    Err(BeadsError::MergeConflict {
        path: path.to_path_buf(),
        detail: format!(
            "{} marker(s); resolve the conflict, then re-run ({})",
            markers.len(),
            preview.join("; ")
        ),
    })
}

/// Repair trivially-corrupt incoming data before reconciliation.
///
/// The `closed_at` invariant is restored in both directions; everything
/// else that fails to parse is a hard error, handled by the codec.
pub fn normalize_issue(issue: &mut Issue) {
    if issue.status == Status::Closed && issue.closed_at.is_none() {
        issue.closed_at = Some(issue.updated_at);
    }
    if issue.status != Status::Closed {
        issue.closed_at = None;
    }
}

/// Hash-gated import of the workspace JSONL into the store.
///
/// The pass is a no-op when the file is missing or its hash matches
/// `last_import_hash`. Parsing and normalization complete before the first
/// store mutation, so malformed input can never partially apply. Deletion
/// reconciliation runs first (and aborts everything on conflict), then
/// collision resolution, then per-issue content reconciliation, orphan-edge
/// repair, and counter sync.
///
/// # Errors
///
/// Returns `MergeConflict`, `DeletionConflict`, `Parse`, or a storage error.
/// On any error before metadata update, re-running the import is safe.
pub fn auto_import(
    storage: &mut SqliteStorage,
    paths: &WorkspacePaths,
    actor: &str,
) -> Result<ImportOutcome> {
    let jsonl_path = &paths.jsonl_path;
    if !jsonl_path.exists() {
        return Ok(ImportOutcome::NoFile);
    }

    let content = fs::read_to_string(jsonl_path)?;
    let file_hash = sha256_hex(content.as_bytes());

    if storage.get_metadata(METADATA_LAST_IMPORT_HASH)?.as_deref() == Some(file_hash.as_str()) {
        tracing::debug!("auto-import: hash gate matched, skipping");
        return Ok(ImportOutcome::Unchanged);
    }

    ensure_no_conflict_markers(&content, jsonl_path)?;

    let mut incoming = jsonl::parse_issues(&content, jsonl_path)?;
    for issue in &mut incoming {
        normalize_issue(issue);
    }

    let right_ids: HashSet<String> = incoming.iter().map(|i| i.id.clone()).collect();
    let deletion_report = snapshot::reconcile_deletions(storage, &right_ids, paths, actor)?;

    let classification = collision::classify(storage, &incoming)?;
    let exact: HashSet<String> = classification.exact.iter().cloned().collect();
    let remapped = collision::resolve_collisions(
        storage,
        &classification.collisions,
        &mut incoming,
        actor,
    )?;

    let mut result = ImportResult {
        deleted: deletion_report.deleted.len(),
        remapped,
        ..ImportResult::default()
    };

    for issue in &incoming {
        if exact.contains(&issue.id) {
            result.unchanged += 1;
            continue;
        }
        if reconcile_issue(storage, issue, actor)? {
            result.created += 1;
        } else {
            result.updated += 1;
        }
    }

    result.orphan_edges_removed = storage.remove_orphaned_dependencies(actor)?;
    storage.sync_all_counters()?;

    snapshot::update_base_snapshot(paths)?;

    // A failure past this point only means the next run re-imports; for
    // unchanged issues that is a no-op.
    if let Err(e) = storage.set_metadata(METADATA_LAST_IMPORT_HASH, &file_hash) {
        tracing::warn!("failed to record import hash, next run will re-import: {e}");
    }
    if let Err(e) = storage.set_metadata(METADATA_LAST_IMPORT_TIME, &Utc::now().to_rfc3339()) {
        tracing::warn!("failed to record import time: {e}");
    }

    tracing::info!(
        created = result.created,
        updated = result.updated,
        unchanged = result.unchanged,
        deleted = result.deleted,
        remapped = result.remapped.len(),
        "auto-import complete"
    );

    Ok(ImportOutcome::Imported(result))
}

/// Insert or field-level-update one incoming issue. Returns `true` when a
/// new row was created.
fn reconcile_issue(storage: &mut SqliteStorage, issue: &Issue, actor: &str) -> Result<bool> {
    let Some(local) = storage.get_issue_full(&issue.id)? else {
        storage.create_issue(issue, actor)?;
        return Ok(true);
    };

    let update = diff_issues(&local, issue);
    if !update.is_empty() {
        storage.update_issue(&issue.id, &update, actor)?;
    }
    storage.sync_labels_for_import(&issue.id, &issue.labels, actor)?;
    storage.sync_dependencies_for_import(&issue.id, &issue.dependencies, actor)?;
    storage.sync_comments_for_import(&issue.id, &issue.comments, actor)?;
    Ok(false)
}

/// Build the minimal patch turning `local` into `incoming` (scalar fields
/// only; relations are synced separately).
fn diff_issues(local: &Issue, incoming: &Issue) -> IssueUpdate {
    let mut update = IssueUpdate::default();

    if local.title != incoming.title {
        update.title = Some(incoming.title.clone());
    }
    if local.description != incoming.description {
        update.description = Some(incoming.description.clone());
    }
    if local.design != incoming.design {
        update.design = Some(incoming.design.clone());
    }
    if local.acceptance_criteria != incoming.acceptance_criteria {
        update.acceptance_criteria = Some(incoming.acceptance_criteria.clone());
    }
    if local.notes != incoming.notes {
        update.notes = Some(incoming.notes.clone());
    }
    if local.status != incoming.status {
        update.status = Some(incoming.status);
        update.closed_at = Some(incoming.closed_at);
    }
    if local.priority != incoming.priority {
        update.priority = Some(incoming.priority);
    }
    if local.issue_type != incoming.issue_type {
        update.issue_type = Some(incoming.issue_type);
    }
    if local.assignee != incoming.assignee {
        update.assignee = Some(incoming.assignee.clone());
    }
    if local.external_ref != incoming.external_ref {
        update.external_ref = Some(incoming.external_ref.clone());
    }
    if local.source_repo != incoming.source_repo {
        update.source_repo = Some(incoming.source_repo.clone());
    }
    if local.close_reason != incoming.close_reason {
        update.close_reason = Some(incoming.close_reason.clone());
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::META_ISSUE_PREFIX;
    use std::collections::HashMap as StdHashMap;
    use tempfile::TempDir;

    fn workspace(temp: &TempDir) -> WorkspacePaths {
        let beads_dir = temp.path().join(".beads");
        fs::create_dir_all(&beads_dir).unwrap();
        WorkspacePaths {
            db_path: beads_dir.join("issues.db"),
            jsonl_path: beads_dir.join("issues.jsonl"),
            beads_dir,
        }
    }

    fn make_store() -> SqliteStorage {
        let mut store = SqliteStorage::open_memory().unwrap();
        store.set_metadata(META_ISSUE_PREFIX, "bd").unwrap();
        store
    }

    fn write_jsonl(paths: &WorkspacePaths, issues: &[Issue]) {
        jsonl::write_issues_atomic(&paths.jsonl_path, issues, &StdHashMap::new()).unwrap();
    }

    #[test]
    fn missing_file_skips() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();
        assert!(matches!(
            auto_import(&mut store, &paths, "tester").unwrap(),
            ImportOutcome::NoFile
        ));
    }

    #[test]
    fn import_creates_and_gates_on_hash() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        write_jsonl(&paths, &[Issue::new("bd-1", "from git")]);

        match auto_import(&mut store, &paths, "tester").unwrap() {
            ImportOutcome::Imported(result) => {
                assert_eq!(result.created, 1);
                assert!(!result.needs_full_export());
            }
            other => panic!("expected import, got {other:?}"),
        }
        assert!(store.get_issue("bd-1").unwrap().is_some());

        // Second run: the hash gate short-circuits.
        assert!(matches!(
            auto_import(&mut store, &paths, "tester").unwrap(),
            ImportOutcome::Unchanged
        ));
    }

    #[test]
    fn idempotent_import_does_not_bump_updated_at() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        write_jsonl(&paths, &[Issue::new("bd-1", "stable")]);
        auto_import(&mut store, &paths, "tester").unwrap();
        let t1 = store.get_issue("bd-1").unwrap().unwrap().updated_at;

        // Clear the gate to force a full reconcile of identical bytes.
        store.delete_metadata(METADATA_LAST_IMPORT_HASH).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(120));

        match auto_import(&mut store, &paths, "tester").unwrap() {
            ImportOutcome::Imported(result) => {
                assert_eq!(result.unchanged, 1);
                assert_eq!(result.created + result.updated, 0);
            }
            other => panic!("expected import, got {other:?}"),
        }
        let t2 = store.get_issue("bd-1").unwrap().unwrap().updated_at;
        assert_eq!(t1, t2);
    }

    #[test]
    fn conflict_markers_abort_untouched() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        fs::write(
            &paths.jsonl_path,
            "<<<<<<< HEAD\n{\"id\":\"bd-1\",\"title\":\"a\"}\n=======\n{\"id\":\"bd-1\",\"title\":\"b\"}\n>>>>>>> theirs\n",
        )
        .unwrap();

        let err = auto_import(&mut store, &paths, "tester").unwrap_err();
        assert!(matches!(err, BeadsError::MergeConflict { .. }));
        assert_eq!(store.count_issues().unwrap(), 0);
    }

    #[test]
    fn parse_error_aborts_whole_import() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        fs::write(
            &paths.jsonl_path,
            "{\"id\":\"bd-1\",\"title\":\"good\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n{broken\n",
        )
        .unwrap();

        let err = auto_import(&mut store, &paths, "tester").unwrap_err();
        assert!(matches!(err, BeadsError::Parse { line: 2, .. }));
        // The good line was not applied either.
        assert_eq!(store.count_issues().unwrap(), 0);
    }

    #[test]
    fn normalization_repairs_closed_at() {
        let mut issue = Issue::new("bd-1", "closed but no timestamp");
        issue.status = Status::Closed;
        issue.closed_at = None;
        normalize_issue(&mut issue);
        assert_eq!(issue.closed_at, Some(issue.updated_at));

        let mut issue = Issue::new("bd-2", "open with stray closed_at");
        issue.closed_at = Some(issue.updated_at);
        normalize_issue(&mut issue);
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn import_updates_only_changed_fields() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        let local = store
            .create_issue(&Issue::new("bd-1", "original"), "tester")
            .unwrap();

        // Same lineage: the incoming copy keeps bd-1's birth timestamp, so
        // divergence is an upstream edit, not an ID collision.
        let mut incoming = local.clone();
        incoming.title = "renamed upstream".to_string();
        write_jsonl(&paths, &[incoming]);

        match auto_import(&mut store, &paths, "tester").unwrap() {
            ImportOutcome::Imported(result) => assert_eq!(result.updated, 1),
            other => panic!("expected import, got {other:?}"),
        }
        let after = store.get_issue("bd-1").unwrap().unwrap();
        assert_eq!(after.title, "renamed upstream");
        assert!(after.updated_at > local.updated_at);
    }

    #[test]
    fn import_syncs_counters_past_explicit_ids() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        write_jsonl(&paths, &[Issue::new("bd-41", "big number")]);
        auto_import(&mut store, &paths, "tester").unwrap();

        let fresh = store
            .create_issue(&Issue::new("", "allocated after import"), "tester")
            .unwrap();
        assert_eq!(fresh.id, "bd-42");
    }

    #[test]
    fn collision_triggers_full_export_flag() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        store
            .create_issue(&Issue::new("bd-1", "local copy"), "tester")
            .unwrap();

        let mut remote = Issue::new("bd-1", "remote copy");
        remote.description = Some("divergent".to_string());
        write_jsonl(&paths, &[remote]);

        match auto_import(&mut store, &paths, "tester").unwrap() {
            ImportOutcome::Imported(result) => {
                assert_eq!(result.remapped.len(), 1);
                assert!(result.needs_full_export());
            }
            other => panic!("expected import, got {other:?}"),
        }
        // Both copies survive under distinct IDs.
        assert_eq!(store.count_issues().unwrap(), 2);
    }
}
