//! Debounced auto-flush: incremental and full export of dirty rows to JSONL.
//!
//! Direct-mode commands flush once on the way out; the daemon debounces
//! mutation bursts through its export debouncer and calls the same routine.
//! Failures are non-fatal to the invoking command: the dirty state is
//! preserved for retry and three consecutive failures escalate once.

use crate::config::WorkspacePaths;
use crate::error::Result;
use crate::jsonl;
use crate::model::Issue;
use crate::storage::SqliteStorage;
use crate::sync::METADATA_LAST_IMPORT_HASH;
use crate::util::content_hash;
use std::collections::BTreeMap;

/// Result of one flush pass.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// False when there was nothing dirty to export.
    pub flushed: bool,
    /// IDs whose content was actually re-exported.
    pub exported: usize,
    /// Lines in the written file.
    pub total: usize,
    /// SHA-256 of the written file.
    pub content_hash: String,
}

/// Flush scheduling flags plus the consecutive-failure counter.
///
/// One instance lives per process: owned by the CLI invocation in direct
/// mode, or by the daemon's single event-loop task (which replaces the
/// lock-around-timer pattern; the debounce timer itself is the daemon's
/// export debouncer).
#[derive(Debug, Default)]
pub struct FlushState {
    dirty: bool,
    needs_full_export: bool,
    failure_count: u32,
    last_error: Option<String>,
}

/// Failures in a row before the user is pointed at a manual export.
const ESCALATION_THRESHOLD: u32 = 3;

impl FlushState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mutation landed; an incremental flush should follow the debounce.
    pub fn mark_dirty_and_schedule_flush(&mut self) {
        self.dirty = true;
    }

    /// An ID-changing operation landed; only a full export can represent it.
    pub fn mark_dirty_and_schedule_full_export(&mut self) {
        self.dirty = true;
        self.needs_full_export = true;
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failure_count
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A manual export ran; forget the failure history.
    pub fn reset(&mut self) {
        self.failure_count = 0;
        self.last_error = None;
    }

    /// Run the debounced flush now.
    ///
    /// Captures and resets the scheduling flags first, so triggers landing
    /// while the flush runs schedule the next cycle instead of being lost.
    /// On failure the flags are restored, the failure counter advances, and
    /// hitting the threshold emits one prominent escalation.
    ///
    /// # Errors
    ///
    /// Propagates the flush error after recording it.
    pub fn run(
        &mut self,
        storage: &mut SqliteStorage,
        paths: &WorkspacePaths,
    ) -> Result<FlushOutcome> {
        if !self.dirty {
            return Ok(FlushOutcome::default());
        }
        let full = self.needs_full_export;
        self.dirty = false;
        self.needs_full_export = false;

        match auto_flush(storage, paths, full) {
            Ok(outcome) => {
                self.failure_count = 0;
                self.last_error = None;
                Ok(outcome)
            }
            Err(e) => {
                self.dirty = true;
                self.needs_full_export = full;
                self.failure_count += 1;
                self.last_error = Some(e.to_string());
                tracing::warn!(
                    failures = self.failure_count,
                    "auto-flush failed, changes kept dirty for retry: {e}"
                );
                if self.failure_count == ESCALATION_THRESHOLD {
                    tracing::error!(
                        "auto-flush has failed {ESCALATION_THRESHOLD} times in a row; \
                         run 'bd sync --flush' to export manually"
                    );
                }
                Err(e)
            }
        }
    }
}

/// Export dirty issues (or everything, with `full`) to the workspace JSONL.
///
/// Incremental export overlays dirty rows onto the current file content so
/// issues owned by other clones are never dropped. Rows deleted after being
/// marked dirty fall out of the map. Dirty flags are cleared only for IDs
/// the writer actually emitted; a timestamp-only issue keeps its flag and
/// its old line. After the write the file's hash is stored as
/// `last_import_hash` so the next auto-import no-ops.
///
/// # Errors
///
/// Returns an error if the store or the filesystem fails; dirty state is
/// untouched in that case.
pub fn auto_flush(
    storage: &mut SqliteStorage,
    paths: &WorkspacePaths,
    full: bool,
) -> Result<FlushOutcome> {
    // Marks landing from here on belong to the next cycle; the clear below
    // only removes marks set strictly before this point.
    let cutoff = chrono::Utc::now();
    let dirty_ids = storage.get_dirty_issue_ids()?;
    if dirty_ids.is_empty() && !full {
        tracing::debug!("auto-flush: no dirty issues, skipping");
        return Ok(FlushOutcome::default());
    }

    let prior_hashes = storage.get_all_export_hashes()?;

    let mut map: BTreeMap<String, Issue> = if full {
        storage
            .get_all_issues_full()?
            .into_iter()
            .map(|issue| (issue.id.clone(), issue))
            .collect()
    } else {
        let (map, skipped) = jsonl::read_issue_map_lenient(&paths.jsonl_path)?;
        if skipped > 0 {
            tracing::warn!(skipped, "auto-flush: malformed lines retained as-is were skipped");
        }
        map
    };

    let mut deleted_ids: Vec<String> = Vec::new();
    if !full {
        for id in &dirty_ids {
            match storage.get_issue_full(id)? {
                Some(issue) => {
                    let unchanged_since_export =
                        prior_hashes.get(id) == Some(&content_hash(&issue));
                    if unchanged_since_export && map.contains_key(id) {
                        // Keep the file's line: re-encoding would only churn
                        // timestamps. The dirty flag survives below.
                        continue;
                    }
                    map.insert(id.clone(), issue);
                }
                None => {
                    // Deleted (or renamed away) after being marked dirty;
                    // the line leaves the file and the flag clears after a
                    // successful write.
                    map.remove(id);
                    deleted_ids.push(id.clone());
                }
            }
        }
    }

    let issues: Vec<Issue> = map.into_values().collect();
    let outcome = jsonl::write_issues_atomic(&paths.jsonl_path, &issues, &prior_hashes)?;

    if !outcome.emitted_ids.is_empty() {
        storage.clear_dirty_issues_before(&outcome.emitted_ids, cutoff)?;
        storage.set_export_hashes(&outcome.hashes)?;
    }
    if !deleted_ids.is_empty() {
        storage.clear_dirty_issues_before(&deleted_ids, cutoff)?;
    }
    if full {
        // A full export also clears dirty rows that vanished from the store.
        let remaining: Vec<String> = storage
            .get_dirty_issue_ids()?
            .into_iter()
            .filter(|id| !issues.iter().any(|i| &i.id == id))
            .collect();
        if !remaining.is_empty() {
            storage.clear_dirty_issues_before(&remaining, cutoff)?;
        }
    }

    storage.set_metadata(METADATA_LAST_IMPORT_HASH, &outcome.content_hash)?;

    tracing::info!(
        exported = outcome.emitted_ids.len(),
        total = outcome.total,
        full,
        "auto-flush complete"
    );

    Ok(FlushOutcome {
        flushed: true,
        exported: outcome.emitted_ids.len(),
        total: outcome.total,
        content_hash: outcome.content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspacePaths;
    use crate::storage::{IssueUpdate, META_ISSUE_PREFIX};
    use crate::sync::{auto_import, ImportOutcome};
    use std::fs;
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

    #[test]
    fn flush_writes_dirty_and_clears_flags() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        let issue = store
            .create_issue(&Issue::new("", "flush me"), "tester")
            .unwrap();

        let outcome = auto_flush(&mut store, &paths, false).unwrap();
        assert!(outcome.flushed);
        assert_eq!(outcome.exported, 1);
        assert!(store.get_dirty_issue_ids().unwrap().is_empty());

        let decoded = jsonl::read_issues(&paths.jsonl_path).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, issue.id);
    }

    #[test]
    fn flush_then_import_is_a_noop() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        store
            .create_issue(&Issue::new("", "round trip"), "tester")
            .unwrap();
        auto_flush(&mut store, &paths, false).unwrap();

        // The flush recorded the file hash, so import gates out.
        assert!(matches!(
            auto_import(&mut store, &paths, "tester").unwrap(),
            ImportOutcome::Unchanged
        ));
    }

    #[test]
    fn incremental_flush_preserves_foreign_lines() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        // A line owned by another clone, unknown to this store.
        fs::write(
            &paths.jsonl_path,
            "{\"id\":\"xx-9\",\"title\":\"foreign\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
        )
        .unwrap();

        store
            .create_issue(&Issue::new("", "mine"), "tester")
            .unwrap();
        auto_flush(&mut store, &paths, false).unwrap();

        let decoded = jsonl::read_issues(&paths.jsonl_path).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().any(|i| i.id == "xx-9"));
    }

    #[test]
    fn deleted_after_dirty_falls_out_of_the_file() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        let issue = store
            .create_issue(&Issue::new("", "short lived"), "tester")
            .unwrap();
        auto_flush(&mut store, &paths, false).unwrap();

        // Touch it (dirty), then delete before the next flush.
        let update = IssueUpdate {
            notes: Some(Some("about to go".to_string())),
            ..IssueUpdate::default()
        };
        store.update_issue(&issue.id, &update, "tester").unwrap();
        store.delete_issue(&issue.id, "tester").unwrap();

        // Another mutation so something is dirty.
        store
            .create_issue(&Issue::new("", "survivor"), "tester")
            .unwrap();
        auto_flush(&mut store, &paths, false).unwrap();

        let decoded = jsonl::read_issues(&paths.jsonl_path).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].title, "survivor");
    }

    #[test]
    fn timestamp_only_dirty_issue_stays_dirty() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        let issue = store
            .create_issue(&Issue::new("", "wobbler"), "tester")
            .unwrap();
        auto_flush(&mut store, &paths, false).unwrap();

        // Change content and revert before any flush: the content hash is
        // back at the exported value while updated_at moved twice.
        let rename = IssueUpdate {
            title: Some("renamed".to_string()),
            ..IssueUpdate::default()
        };
        store.update_issue(&issue.id, &rename, "tester").unwrap();
        let restore = IssueUpdate {
            title: Some("wobbler".to_string()),
            ..IssueUpdate::default()
        };
        store.update_issue(&issue.id, &restore, "tester").unwrap();

        // The stored export hash still matches, so the flush elides the
        // line and keeps the flag.
        let outcome = auto_flush(&mut store, &paths, false).unwrap();
        assert_eq!(outcome.exported, 0);
        assert_eq!(store.get_dirty_issue_ids().unwrap(), vec![issue.id.clone()]);
        assert_eq!(store.count_timestamp_only_dirty().unwrap(), 1);

        // A real content change still exports.
        let change = IssueUpdate {
            notes: Some(Some("real change".to_string())),
            ..IssueUpdate::default()
        };
        store.update_issue(&issue.id, &change, "tester").unwrap();
        let outcome = auto_flush(&mut store, &paths, false).unwrap();
        assert_eq!(outcome.exported, 1);
        assert!(store.get_dirty_issue_ids().unwrap().is_empty());
    }

    #[test]
    fn failure_backoff_escalates_once_and_success_resets() {
        let temp = TempDir::new().unwrap();
        // Point the JSONL at a directory that cannot be created over.
        let beads_dir = temp.path().join(".beads");
        fs::create_dir_all(&beads_dir).unwrap();
        let paths = WorkspacePaths {
            db_path: beads_dir.join("issues.db"),
            jsonl_path: beads_dir.join("no-such-dir").join("issues.jsonl"),
            beads_dir: beads_dir.clone(),
        };
        let mut store = make_store();
        store
            .create_issue(&Issue::new("", "stuck"), "tester")
            .unwrap();

        let mut state = FlushState::new();
        for expected in 1..=3 {
            state.mark_dirty_and_schedule_flush();
            assert!(state.run(&mut store, &paths).is_err());
            assert_eq!(state.failure_count(), expected);
        }
        assert!(state.last_error().is_some());
        // Dirty state survived every failure.
        assert!(!store.get_dirty_issue_ids().unwrap().is_empty());

        // Fix the path; the next run succeeds and zeroes the counter.
        let paths = WorkspacePaths {
            db_path: beads_dir.join("issues.db"),
            jsonl_path: beads_dir.join("issues.jsonl"),
            beads_dir,
        };
        state.mark_dirty_and_schedule_flush();
        state.run(&mut store, &paths).unwrap();
        assert_eq!(state.failure_count(), 0);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn full_export_rewrites_everything() {
        let temp = TempDir::new().unwrap();
        let paths = workspace(&temp);
        let mut store = make_store();

        store
            .create_issue(&Issue::new("", "one"), "tester")
            .unwrap();
        store
            .create_issue(&Issue::new("", "two"), "tester")
            .unwrap();
        auto_flush(&mut store, &paths, false).unwrap();

        // Stale foreign line would survive an incremental flush but not a
        // full export.
        let mut content = fs::read_to_string(&paths.jsonl_path).unwrap();
        content.push_str("{\"id\":\"zz-1\",\"title\":\"stale\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n");
        fs::write(&paths.jsonl_path, content).unwrap();

        let outcome = auto_flush(&mut store, &paths, true).unwrap();
        assert!(outcome.flushed);
        let decoded = jsonl::read_issues(&paths.jsonl_path).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(!decoded.iter().any(|i| i.id == "zz-1"));
    }
}
