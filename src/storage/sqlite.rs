//! `SQLite` storage implementation.
//!
//! All mutations run through [`SqliteStorage::mutate`], which collects audit
//! events and dirty IDs in a [`MutationContext`] and writes both inside the
//! same transaction. A mutation that fails leaves the dirty set untouched.

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, DependencyType, Event, EventType, Issue, IssueType, Priority, Status,
};
use crate::storage::schema::apply_schema;
use crate::util::{content_hash, parse_id};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

/// Metadata key holding the workspace's configured issue prefix.
pub const META_ISSUE_PREFIX: &str = "issue_prefix";

/// Metadata key holding the tool version that created the database.
pub const META_BD_VERSION: &str = "bd_version";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, tracking side effects.
pub struct MutationContext {
    pub op_name: String,
    pub actor: String,
    pub events: Vec<Event>,
    pub dirty_ids: HashSet<String>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: HashSet::new(),
        }
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, details: Option<String>) {
        self.events.push(Event {
            id: 0, // DB assigns the real ID
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value: None,
            new_value: None,
            comment: details,
            created_at: Utc::now(),
        });
    }

    /// Record a field change event with old and new values.
    pub fn record_field_change(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        comment: Option<String>,
    ) {
        self.events.push(Event {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment,
            created_at: Utc::now(),
        });
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }
}

/// Result of a bulk delete.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct DeleteResult {
    pub deleted_count: usize,
    pub deps_removed: usize,
    pub labels_removed: usize,
    pub comments_removed: usize,
    pub events_removed: usize,
    /// Issues left holding a dangling reference to a deleted issue.
    pub orphaned_issues: Vec<String>,
}

impl SqliteStorage {
    /// Open a connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Some(5_000))
    }

    /// Open a connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (tests and `--no-db` runs).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation inside one transaction.
    ///
    /// The closure does the row work; events and dirty flags collected in the
    /// [`MutationContext`] are written before commit. On error everything
    /// rolls back, including the dirty set.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a storage error from commit.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.old_value,
                    event.new_value,
                    event.comment,
                    event.created_at.to_rfc3339()
                ],
            )?;
        }

        for id in ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )?;
        }

        tx.commit()?;

        Ok(result)
    }

    // ===== Issues =====

    /// Create a new issue.
    ///
    /// An empty `issue.id` allocates the next number from the configured
    /// prefix counter atomically. An explicit ID with the configured prefix
    /// consumes that number and advances the counter past it.
    ///
    /// # Errors
    ///
    /// Returns an error on ID/prefix validation failure or if the ID already
    /// exists.
    pub fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<Issue> {
        if issue.title.is_empty() || issue.title.len() > 500 {
            return Err(BeadsError::validation("title", "must be 1-500 characters"));
        }

        let mut stored = issue.clone();

        let id = self.mutate("create_issue", actor, |tx, ctx| {
            let id = if issue.id.is_empty() {
                let prefix = metadata_get_tx(tx, META_ISSUE_PREFIX)?.ok_or_else(|| {
                    BeadsError::validation("id", "no issue prefix configured; run 'bd init'")
                })?;
                let number = counter_next_tx(tx, &prefix)?;
                crate::util::format_id(&prefix, number)
            } else {
                let parsed = parse_id(&issue.id)?;
                if let Some(prefix) = metadata_get_tx(tx, META_ISSUE_PREFIX)? {
                    if parsed.prefix == prefix {
                        counter_raise_tx(tx, &parsed.prefix, parsed.number)?;
                    }
                }
                issue.id.clone()
            };

            let exists: bool = tx
                .query_row("SELECT 1 FROM issues WHERE id = ?", [&id], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            if exists {
                return Err(BeadsError::validation("id", format!("{id} already exists")));
            }

            insert_issue_row_tx(tx, &id, issue)?;

            for label in &issue.labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                    rusqlite::params![id, label],
                )?;
            }
            for dep in &issue.dependencies {
                tx.execute(
                    "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type) VALUES (?, ?, ?)",
                    rusqlite::params![id, dep.depends_on_id, dep.dep_type.as_str()],
                )?;
            }
            for comment in &issue.comments {
                tx.execute(
                    "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                    rusqlite::params![
                        id,
                        comment.author,
                        comment.body,
                        comment.created_at.to_rfc3339()
                    ],
                )?;
            }

            ctx.record_event(
                EventType::Created,
                &id,
                Some(format!("Created issue: {}", issue.title)),
            );
            ctx.mark_dirty(&id);

            Ok(id)
        })?;

        stored.id = id;
        Ok(stored)
    }

    /// Get an issue row by ID (labels/dependencies/comments not loaded).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let mut stmt = self.conn.prepare(ISSUE_SELECT_BY_ID)?;
        let result = stmt.query_row([id], issue_from_row);

        match result {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get an issue with labels, dependency records, and comments embedded,
    /// as it appears in the JSONL representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue_full(&self, id: &str) -> Result<Option<Issue>> {
        let Some(mut issue) = self.get_issue(id)? else {
            return Ok(None);
        };
        issue.labels = self.get_labels(id)?;
        issue.dependencies = self.get_dependency_records(id)?;
        issue.comments = self.get_comments(id)?;
        Ok(Some(issue))
    }

    /// Update an issue's fields from a typed patch.
    ///
    /// `updated_at` is bumped only when at least one field actually changed;
    /// an update that round-trips identical values is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the update fails.
    #[allow(clippy::too_many_lines)]
    pub fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        self.mutate("update_issue", actor, |tx, ctx| {
            let mut set_clauses: Vec<String> = vec![];
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
            let mut changed = false;

            let mut add_update = |field: &str, val: Box<dyn rusqlite::ToSql>| {
                set_clauses.push(format!("{field} = ?"));
                params.push(val);
            };

            if let Some(ref title) = updates.title {
                if *title != issue.title {
                    if title.is_empty() || title.len() > 500 {
                        return Err(BeadsError::validation("title", "must be 1-500 characters"));
                    }
                    changed = true;
                    add_update("title", Box::new(title.clone()));
                    ctx.record_field_change(
                        EventType::Updated,
                        id,
                        Some(issue.title.clone()),
                        Some(title.clone()),
                        Some("Title changed".to_string()),
                    );
                }
            }

            if let Some(ref val) = updates.description {
                if *val != issue.description {
                    changed = true;
                    add_update("description", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.design {
                if *val != issue.design {
                    changed = true;
                    add_update("design", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.acceptance_criteria {
                if *val != issue.acceptance_criteria {
                    changed = true;
                    add_update("acceptance_criteria", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.notes {
                if *val != issue.notes {
                    changed = true;
                    add_update("notes", Box::new(val.clone()));
                }
            }

            if let Some(status) = updates.status {
                if status != issue.status {
                    changed = true;
                    add_update("status", Box::new(status.as_str().to_string()));
                    ctx.record_field_change(
                        EventType::StatusChanged,
                        id,
                        Some(issue.status.as_str().to_string()),
                        Some(status.as_str().to_string()),
                        None,
                    );

                    // closed_at is non-null iff status is closed
                    if status == Status::Closed {
                        if updates.closed_at.is_none() && issue.closed_at.is_none() {
                            add_update("closed_at", Box::new(Utc::now().to_rfc3339()));
                        }
                    } else if issue.closed_at.is_some() && updates.closed_at.is_none() {
                        add_update("closed_at", Box::new(None::<String>));
                    }
                }
            }

            if let Some(priority) = updates.priority {
                if priority != issue.priority {
                    changed = true;
                    add_update("priority", Box::new(priority.0));
                }
            }

            if let Some(issue_type) = updates.issue_type {
                if issue_type != issue.issue_type {
                    changed = true;
                    add_update("issue_type", Box::new(issue_type.as_str().to_string()));
                }
            }

            if let Some(ref val) = updates.assignee {
                if *val != issue.assignee {
                    changed = true;
                    add_update("assignee", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.external_ref {
                if *val != issue.external_ref {
                    changed = true;
                    add_update("external_ref", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.source_repo {
                if *val != issue.source_repo {
                    changed = true;
                    add_update("source_repo", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.close_reason {
                if *val != issue.close_reason {
                    changed = true;
                    add_update("close_reason", Box::new(val.clone()));
                }
            }
            if let Some(ref val) = updates.closed_at {
                if *val != issue.closed_at {
                    changed = true;
                    add_update("closed_at", Box::new(val.map(|d| d.to_rfc3339())));
                }
            }

            if !changed {
                return Ok(());
            }

            set_clauses.push("updated_at = ?".to_string());
            params.push(Box::new(Utc::now().to_rfc3339()));

            let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
            params.push(Box::new(id.to_string()));

            let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, params_refs.as_slice())?;

            ctx.mark_dirty(id);
            Ok(())
        })?;

        self.get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })
    }

    /// Close an issue, recording the reason and actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist.
    pub fn close_issue(&mut self, id: &str, reason: Option<&str>, actor: &str) -> Result<Issue> {
        let issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if issue.status == Status::Closed {
            return Ok(issue);
        }

        self.mutate("close_issue", actor, |tx, ctx| {
            tx.execute(
                "UPDATE issues SET status = 'closed', closed_at = ?, close_reason = ?, updated_at = ? WHERE id = ?",
                rusqlite::params![
                    Utc::now().to_rfc3339(),
                    reason,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )?;
            ctx.record_field_change(
                EventType::Closed,
                id,
                Some(issue.status.as_str().to_string()),
                Some("closed".to_string()),
                reason.map(str::to_string),
            );
            ctx.mark_dirty(id);
            Ok(())
        })?;

        self.get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })
    }

    /// Hard-delete an issue and everything attached to it.
    ///
    /// Dependency edges touching the issue, labels, comments, and audit
    /// events are removed in the same transaction. The ID stays in the
    /// dirty set: the next flush sees the row gone, drops the line from the
    /// JSONL, and clears the flag. Other clones pick the deletion up
    /// through the deletion reconciler, never by re-creating the row.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the delete fails.
    pub fn delete_issue(&mut self, id: &str, actor: &str) -> Result<()> {
        self.get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        self.mutate("delete_issue", actor, |tx, ctx| {
            // Surviving endpoints of removed edges must re-export their
            // embedded dependency lists.
            let mut stmt = tx.prepare(
                "SELECT issue_id FROM dependencies WHERE depends_on_id = ? AND issue_id != ?",
            )?;
            let dependents: Vec<String> = stmt
                .query_map(rusqlite::params![id, id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? OR depends_on_id = ?",
                rusqlite::params![id, id],
            )?;
            tx.execute("DELETE FROM labels WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM comments WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM events WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM export_hashes WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM issues WHERE id = ?", [id])?;

            ctx.mark_dirty(id);
            for dependent in dependents {
                ctx.mark_dirty(&dependent);
            }
            Ok(())
        })
    }

    /// Bulk delete with cascade/orphan accounting.
    ///
    /// Without `cascade`, issues that depend on a deleted issue are reported
    /// as orphans; the delete is refused unless `force` is set. With
    /// `cascade`, dependents are pulled into the deletion set transitively.
    /// `dry_run` computes the result without touching the database.
    ///
    /// # Errors
    ///
    /// Returns a validation error when orphans exist and neither `cascade`
    /// nor `force` was given.
    pub fn delete_issues(
        &mut self,
        ids: &[String],
        cascade: bool,
        force: bool,
        dry_run: bool,
        actor: &str,
    ) -> Result<DeleteResult> {
        let mut to_delete: HashSet<String> = HashSet::new();
        for id in ids {
            self.get_issue(id)?
                .ok_or_else(|| BeadsError::IssueNotFound { id: id.clone() })?;
            to_delete.insert(id.clone());
        }

        if cascade {
            // Pull in transitive dependents.
            let mut frontier: Vec<String> = to_delete.iter().cloned().collect();
            while let Some(id) = frontier.pop() {
                for dependent in self.get_dependents(&id)? {
                    if to_delete.insert(dependent.clone()) {
                        frontier.push(dependent);
                    }
                }
            }
        }

        let mut orphans: Vec<String> = Vec::new();
        for id in &to_delete {
            for dependent in self.get_dependents(id)? {
                if !to_delete.contains(&dependent) && !orphans.contains(&dependent) {
                    orphans.push(dependent);
                }
            }
        }
        orphans.sort();

        if !orphans.is_empty() && !force && !cascade {
            return Err(BeadsError::validation(
                "delete",
                format!(
                    "{} issue(s) would be orphaned: {}; use --cascade or --force",
                    orphans.len(),
                    orphans.join(", ")
                ),
            ));
        }

        let mut result = DeleteResult {
            orphaned_issues: orphans,
            ..DeleteResult::default()
        };

        let sorted: Vec<String> = {
            let mut v: Vec<String> = to_delete.iter().cloned().collect();
            v.sort();
            v
        };

        for id in &sorted {
            result.deps_removed += self.conn.query_row(
                "SELECT COUNT(*) FROM dependencies WHERE issue_id = ?1 OR depends_on_id = ?1",
                [id],
                |row| row.get::<_, usize>(0),
            )?;
            result.labels_removed += self.conn.query_row(
                "SELECT COUNT(*) FROM labels WHERE issue_id = ?",
                [id],
                |row| row.get::<_, usize>(0),
            )?;
            result.comments_removed += self.conn.query_row(
                "SELECT COUNT(*) FROM comments WHERE issue_id = ?",
                [id],
                |row| row.get::<_, usize>(0),
            )?;
            result.events_removed += self.conn.query_row(
                "SELECT COUNT(*) FROM events WHERE issue_id = ?",
                [id],
                |row| row.get::<_, usize>(0),
            )?;
        }
        result.deleted_count = sorted.len();

        if dry_run {
            return Ok(result);
        }

        for id in &sorted {
            self.delete_issue(id, actor)?;
        }

        Ok(result)
    }

    /// Atomically rename an issue, rewriting every inbound reference held in
    /// relational state (dependency endpoints, labels, comments, events,
    /// dirty flags). Free-text references are the collision resolver's job.
    ///
    /// # Errors
    ///
    /// Returns an error if `old_id` is missing or `new_id` already exists.
    pub fn update_issue_id(&mut self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        self.get_issue(old_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: old_id.to_string(),
            })?;
        if self.get_issue(new_id)?.is_some() {
            return Err(BeadsError::validation(
                "id",
                format!("{new_id} already exists"),
            ));
        }
        let parsed = parse_id(new_id)?;

        self.mutate("update_issue_id", actor, |tx, ctx| {
            tx.execute(
                "UPDATE issues SET id = ?, updated_at = ? WHERE id = ?",
                rusqlite::params![new_id, Utc::now().to_rfc3339(), old_id],
            )?;
            tx.execute(
                "UPDATE dependencies SET issue_id = ? WHERE issue_id = ?",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute(
                "UPDATE dependencies SET depends_on_id = ? WHERE depends_on_id = ?",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute(
                "UPDATE labels SET issue_id = ? WHERE issue_id = ?",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute(
                "UPDATE comments SET issue_id = ? WHERE issue_id = ?",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute(
                "UPDATE events SET issue_id = ? WHERE issue_id = ?",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute("DELETE FROM export_hashes WHERE issue_id = ?", [old_id])?;

            counter_raise_tx(tx, &parsed.prefix, parsed.number)?;

            ctx.record_field_change(
                EventType::IdRemapped,
                new_id,
                Some(old_id.to_string()),
                Some(new_id.to_string()),
                None,
            );
            // The old ID's line must leave the JSONL even on an
            // incremental flush; the row is gone, so the mark clears after
            // the next successful write.
            ctx.mark_dirty(old_id);
            ctx.mark_dirty(new_id);
            Ok(())
        })
    }

    /// List issues with optional filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut sql = String::from(ISSUE_SELECT);
        sql.push_str(" WHERE 1=1");

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref statuses) = filters.statuses {
            if !statuses.is_empty() {
                let placeholders: Vec<&str> = statuses.iter().map(|_| "?").collect();
                let _ = write!(sql, " AND status IN ({})", placeholders.join(","));
                for s in statuses {
                    params.push(Box::new(s.as_str().to_string()));
                }
            }
        }
        if let Some(issue_type) = filters.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(priority) = filters.priority {
            sql.push_str(" AND priority = ?");
            params.push(Box::new(priority.0));
        }
        if let Some(ref assignee) = filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if let Some(ref label) = filters.label {
            sql.push_str(" AND id IN (SELECT issue_id FROM labels WHERE label = ?)");
            params.push(Box::new(label.clone()));
        }
        if !filters.include_closed {
            sql.push_str(" AND status != 'closed'");
        }

        sql.push_str(" ORDER BY priority ASC, created_at DESC");

        if let Some(limit) = filters.limit {
            if limit > 0 {
                sql.push_str(" LIMIT ?");
                params.push(Box::new(limit));
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(issues)
    }

    /// Substring search over title, description, design, and notes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return self.list_issues(filters);
        }

        let candidates = self.list_issues(filters)?;
        let needle = trimmed.to_lowercase();

        Ok(candidates
            .into_iter()
            .filter(|issue| {
                issue.title.to_lowercase().contains(&needle)
                    || issue
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || issue
                        .design
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || issue
                        .notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
                    || issue.id.to_lowercase().contains(&needle)
            })
            .collect())
    }

    /// All issues with labels/dependencies/comments embedded, for export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_issues_full(&self) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(ISSUE_SELECT)?;
        let mut issues = stmt
            .query_map([], issue_from_row)?
            .collect::<std::result::Result<Vec<Issue>, _>>()?;

        let mut labels = self.get_all_labels()?;
        let mut deps = self.get_all_dependency_map()?;
        let mut comments = self.get_all_comments()?;
        for issue in &mut issues {
            issue.labels = labels.remove(&issue.id).unwrap_or_default();
            issue.labels.sort();
            issue.dependencies = deps.remove(&issue.id).unwrap_or_default();
            issue.comments = comments.remove(&issue.id).unwrap_or_default();
        }

        issues.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(issues)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn id_exists(&self, id: &str) -> Result<bool> {
        let exists = self
            .conn
            .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_issues(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(count)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM issues ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ===== Dependencies =====

    /// Add a dependency edge.
    ///
    /// Refuses self-edges, duplicates, edges whose endpoints don't exist,
    /// reversed parent-child edges, and edges that would close a cycle
    /// through blocking types. Both endpoints are marked dirty.
    ///
    /// # Errors
    ///
    /// See above; each refusal has its own error kind.
    pub fn add_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<()> {
        if dep.issue_id == dep.depends_on_id {
            return Err(BeadsError::SelfDependency {
                id: dep.issue_id.clone(),
            });
        }
        self.get_issue(&dep.issue_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: dep.issue_id.clone(),
            })?;
        self.get_issue(&dep.depends_on_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: dep.depends_on_id.clone(),
            })?;

        if self.dependency_exists(&dep.issue_id, &dep.depends_on_id)? {
            return Err(BeadsError::DuplicateDependency {
                from: dep.issue_id.clone(),
                to: dep.depends_on_id.clone(),
            });
        }

        // Parent-child is directed child -> parent. An existing edge the
        // other way means this insertion is reversed.
        if dep.dep_type == DependencyType::ParentChild {
            let reversed: bool = self
                .conn
                .query_row(
                    "SELECT 1 FROM dependencies WHERE issue_id = ? AND depends_on_id = ? AND type = 'parent-child'",
                    rusqlite::params![dep.depends_on_id, dep.issue_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if reversed {
                return Err(BeadsError::InvalidParentChild {
                    child: dep.depends_on_id.clone(),
                    parent: dep.issue_id.clone(),
                });
            }
        }

        if dep.dep_type.is_blocking()
            && self.would_create_cycle(&dep.issue_id, &dep.depends_on_id)?
        {
            return Err(BeadsError::DependencyCycle {
                path: format!("{} -> {}", dep.issue_id, dep.depends_on_id),
            });
        }

        self.mutate("add_dependency", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO dependencies (issue_id, depends_on_id, type) VALUES (?, ?, ?)",
                rusqlite::params![dep.issue_id, dep.depends_on_id, dep.dep_type.as_str()],
            )?;
            ctx.record_event(
                EventType::DependencyAdded,
                &dep.issue_id,
                Some(format!("{} {}", dep.dep_type, dep.depends_on_id)),
            );
            ctx.mark_dirty(&dep.issue_id);
            ctx.mark_dirty(&dep.depends_on_id);
            Ok(())
        })
    }

    /// Remove a dependency edge; both endpoints are marked dirty.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if no such edge exists.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        if !self.dependency_exists(issue_id, depends_on_id)? {
            return Err(BeadsError::validation(
                "dependency",
                format!("no edge {issue_id} -> {depends_on_id}"),
            ));
        }

        self.mutate("remove_dependency", actor, |tx, ctx| {
            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                rusqlite::params![issue_id, depends_on_id],
            )?;
            ctx.record_event(
                EventType::DependencyRemoved,
                issue_id,
                Some(depends_on_id.to_string()),
            );
            ctx.mark_dirty(issue_id);
            ctx.mark_dirty(depends_on_id);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn dependency_exists(&self, issue_id: &str, depends_on_id: &str) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                rusqlite::params![issue_id, depends_on_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// IDs this issue depends on.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dependencies(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depends_on_id FROM dependencies WHERE issue_id = ? ORDER BY depends_on_id")?;
        let ids = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// IDs that depend on this issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dependents(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dependencies WHERE depends_on_id = ? ORDER BY issue_id")?;
        let ids = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Full dependency records for one issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type FROM dependencies WHERE issue_id = ? ORDER BY depends_on_id",
        )?;
        let deps = stmt
            .query_map([issue_id], dependency_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    /// Every dependency record in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn all_dependency_records(&self) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type FROM dependencies ORDER BY issue_id, depends_on_id",
        )?;
        let deps = stmt
            .query_map([], dependency_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    fn get_all_dependency_map(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for dep in self.all_dependency_records()? {
            map.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        Ok(map)
    }

    /// Drop edges whose endpoints no longer exist. Surviving endpoints are
    /// marked dirty so their embedded dependency lists re-export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_orphaned_dependencies(&mut self, actor: &str) -> Result<usize> {
        self.mutate("remove_orphaned_dependencies", actor, |tx, ctx| {
            let mut stmt = tx.prepare(
                "SELECT issue_id, depends_on_id FROM dependencies
                 WHERE issue_id NOT IN (SELECT id FROM issues)
                    OR depends_on_id NOT IN (SELECT id FROM issues)",
            )?;
            let orphaned: Vec<(String, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            for (from, to) in &orphaned {
                tx.execute(
                    "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                    rusqlite::params![from, to],
                )?;
                for endpoint in [from, to] {
                    let alive: bool = tx
                        .query_row("SELECT 1 FROM issues WHERE id = ?", [endpoint], |_| Ok(true))
                        .optional()?
                        .unwrap_or(false);
                    if alive {
                        ctx.mark_dirty(endpoint);
                    }
                }
            }

            Ok(orphaned.len())
        })
    }

    // ===== Labels =====

    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the insert fails.
    pub fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        self.get_issue(issue_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            })?;

        self.mutate("add_label", actor, |tx, ctx| {
            let added = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
            if added > 0 {
                ctx.record_event(EventType::LabelAdded, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(added > 0)
        })
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        self.mutate("remove_label", actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM labels WHERE issue_id = ? AND label = ?",
                rusqlite::params![issue_id, label],
            )?;
            if removed > 0 {
                ctx.record_event(EventType::LabelRemoved, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(labels)
    }

    fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY label")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (issue_id, label) in rows {
            map.entry(issue_id).or_default().push(label);
        }
        Ok(map)
    }

    // ===== Comments =====

    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the insert fails.
    pub fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.get_issue(issue_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            })?;

        let created_at = Utc::now();
        let comment_id = self.mutate("add_comment", author, |tx, ctx| {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![issue_id, author, text, created_at.to_rfc3339()],
            )?;
            let id = tx.last_insert_rowid();
            ctx.record_event(EventType::Commented, issue_id, None);
            ctx.mark_dirty(issue_id);
            Ok(id)
        })?;

        Ok(Comment {
            id: comment_id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            body: text.to_string(),
            created_at,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments WHERE issue_id = ? ORDER BY id",
        )?;
        let comments = stmt
            .query_map([issue_id], comment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments ORDER BY id",
        )?;
        let comments = stmt
            .query_map([], comment_from_row)?
            .collect::<std::result::Result<Vec<Comment>, _>>()?;

        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for comment in comments {
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }

    // ===== Events =====

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_events(&self, issue_id: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE issue_id = ? ORDER BY id",
        )?;
        let events = stmt
            .query_map([issue_id], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // ===== Config =====

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<String, String>, _>>()?;
        Ok(rows)
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_config(&mut self, key: &str) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM config WHERE key = ?", [key])?;
        Ok(removed > 0)
    }

    // ===== Metadata =====

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_metadata(&mut self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM metadata WHERE key = ?", [key])?;
        Ok(removed > 0)
    }

    // ===== Dirty tracking =====

    /// IDs changed since their last successful export, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dirty_issue_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at, issue_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Clear dirty flags for exactly the given IDs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_dirty_issues(&mut self, issue_ids: &[String]) -> Result<usize> {
        let mut cleared = 0;
        let tx = self.conn.transaction()?;
        for id in issue_ids {
            cleared += tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
        }
        tx.commit()?;
        Ok(cleared)
    }

    /// Clear dirty flags for the given IDs, but only marks set strictly
    /// before `cutoff`. A mutation from another process that re-marks an ID
    /// while an export is in flight keeps its flag and reaches the next
    /// flush cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_dirty_issues_before(
        &mut self,
        issue_ids: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff_str = cutoff.to_rfc3339();
        let mut cleared = 0;
        let tx = self.conn.transaction()?;
        for id in issue_ids {
            cleared += tx.execute(
                "DELETE FROM dirty_issues WHERE issue_id = ? AND marked_at < ?",
                rusqlite::params![id, cutoff_str],
            )?;
        }
        tx.commit()?;
        Ok(cleared)
    }

    /// Diagnostic: dirty issues whose current content hash equals their
    /// export hash. These stay dirty until a content change because the
    /// writer elides timestamp-only lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_timestamp_only_dirty(&self) -> Result<usize> {
        let mut count = 0;
        for id in self.get_dirty_issue_ids()? {
            let Some(issue) = self.get_issue_full(&id)? else {
                continue;
            };
            if self.get_export_hash(&id)? == Some(content_hash(&issue)) {
                count += 1;
            }
        }
        Ok(count)
    }

    // ===== Export hashes =====

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>> {
        let hash = self
            .conn
            .query_row(
                "SELECT content_hash FROM export_hashes WHERE issue_id = ?",
                [issue_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_export_hashes(&mut self, hashes: &[(String, String)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (id, hash) in hashes {
            tx.execute(
                "INSERT OR REPLACE INTO export_hashes (issue_id, content_hash, exported_at) VALUES (?, ?, ?)",
                rusqlite::params![id, hash, now],
            )?;
        }
        tx.commit()?;
        Ok(hashes.len())
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_export_hashes(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, content_hash FROM export_hashes")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<String, String>, _>>()?;
        Ok(rows)
    }

    // ===== Import sync helpers =====

    /// Replace an issue's label set with the imported one. Marks the issue
    /// dirty only when the set actually changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_labels_for_import(
        &mut self,
        issue_id: &str,
        labels: &[String],
        actor: &str,
    ) -> Result<bool> {
        let mut current = self.get_labels(issue_id)?;
        current.sort();
        let mut wanted: Vec<String> = labels.to_vec();
        wanted.sort();
        wanted.dedup();
        if current == wanted {
            return Ok(false);
        }

        self.mutate("sync_labels_for_import", actor, |tx, ctx| {
            tx.execute("DELETE FROM labels WHERE issue_id = ?", [issue_id])?;
            for label in &wanted {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                    rusqlite::params![issue_id, label],
                )?;
            }
            ctx.mark_dirty(issue_id);
            Ok(true)
        })
    }

    /// Replace an issue's outgoing dependency edges with the imported ones.
    /// Edges pointing at issues that don't exist yet are kept; the orphan
    /// repair pass at the end of the import drops any that never arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_dependencies_for_import(
        &mut self,
        issue_id: &str,
        deps: &[Dependency],
        actor: &str,
    ) -> Result<bool> {
        let current = self.get_dependency_records(issue_id)?;
        let current_set: HashSet<(String, String)> = current
            .iter()
            .map(|d| (d.depends_on_id.clone(), d.dep_type.as_str().to_string()))
            .collect();
        let wanted_set: HashSet<(String, String)> = deps
            .iter()
            .map(|d| (d.depends_on_id.clone(), d.dep_type.as_str().to_string()))
            .collect();
        if current_set == wanted_set {
            return Ok(false);
        }

        self.mutate("sync_dependencies_for_import", actor, |tx, ctx| {
            tx.execute("DELETE FROM dependencies WHERE issue_id = ?", [issue_id])?;
            for dep in deps {
                if dep.depends_on_id == issue_id {
                    continue;
                }
                tx.execute(
                    "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type) VALUES (?, ?, ?)",
                    rusqlite::params![issue_id, dep.depends_on_id, dep.dep_type.as_str()],
                )?;
                ctx.mark_dirty(&dep.depends_on_id);
            }
            ctx.mark_dirty(issue_id);
            Ok(true)
        })
    }

    /// Append imported comments the issue doesn't already have (matched by
    /// author and body; comments are append-only).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_comments_for_import(
        &mut self,
        issue_id: &str,
        comments: &[Comment],
        actor: &str,
    ) -> Result<bool> {
        let current = self.get_comments(issue_id)?;
        let have: HashSet<(String, String)> = current
            .iter()
            .map(|c| (c.author.clone(), c.body.clone()))
            .collect();
        let missing: Vec<&Comment> = comments
            .iter()
            .filter(|c| !have.contains(&(c.author.clone(), c.body.clone())))
            .collect();
        if missing.is_empty() {
            return Ok(false);
        }

        self.mutate("sync_comments_for_import", actor, |tx, ctx| {
            for comment in missing {
                tx.execute(
                    "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                    rusqlite::params![
                        issue_id,
                        comment.author,
                        comment.body,
                        comment.created_at.to_rfc3339()
                    ],
                )?;
            }
            ctx.mark_dirty(issue_id);
            Ok(true)
        })
    }

    // ===== Counters =====

    /// Last allocated number for a prefix, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_counter(&self, prefix: &str) -> Result<Option<u64>> {
        let value = self
            .conn
            .query_row(
                "SELECT last_number FROM counters WHERE prefix = ?",
                [prefix],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value.map(|v| u64::try_from(v).unwrap_or(0)))
    }

    /// Set a counter to an explicit value (admin path; sync never lowers it).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn reset_counter(&mut self, prefix: &str, value: u64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO counters (prefix, last_number) VALUES (?, ?)",
            rusqlite::params![prefix, i64::try_from(value).unwrap_or(i64::MAX)],
        )?;
        Ok(())
    }

    /// Raise every prefix counter to at least the maximum live numeric
    /// suffix. Never decrements. Returns the prefixes that were raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_all_counters(&mut self) -> Result<Vec<String>> {
        let mut max_by_prefix: HashMap<String, u64> = HashMap::new();
        for id in self.get_all_ids()? {
            if let Ok(parsed) = parse_id(&id) {
                let entry = max_by_prefix.entry(parsed.prefix).or_insert(0);
                *entry = (*entry).max(parsed.number);
            }
        }

        let mut raised = Vec::new();
        for (prefix, max_number) in max_by_prefix {
            let current = self.get_counter(&prefix)?.unwrap_or(0);
            if max_number > current {
                self.reset_counter(&prefix, max_number)?;
                raised.push(prefix);
            }
        }
        raised.sort();
        Ok(raised)
    }

    /// Move a counter row to a new prefix, keeping the higher value when the
    /// target already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn rename_counter_prefix(&mut self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        let old_value = self.get_counter(old_prefix)?.unwrap_or(0);
        let new_value = self.get_counter(new_prefix)?.unwrap_or(0);
        self.reset_counter(new_prefix, old_value.max(new_value))?;
        self.conn
            .execute("DELETE FROM counters WHERE prefix = ?", [old_prefix])?;
        Ok(())
    }

    /// Rewrite the prefix of every dependency endpoint, for workspace-wide
    /// prefix renames.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn rename_dependency_prefix(
        &mut self,
        old_prefix: &str,
        new_prefix: &str,
        actor: &str,
    ) -> Result<usize> {
        let old_like = format!("{old_prefix}-%");
        self.mutate("rename_dependency_prefix", actor, |tx, _ctx| {
            let mut renamed = 0;
            for column in ["issue_id", "depends_on_id"] {
                let sql = format!(
                    "UPDATE dependencies SET {column} = ? || substr({column}, ?) WHERE {column} LIKE ?"
                );
                renamed += tx.execute(
                    &sql,
                    rusqlite::params![
                        new_prefix,
                        i64::try_from(old_prefix.len()).unwrap_or(i64::MAX) + 1,
                        old_like
                    ],
                )?;
            }
            Ok(renamed)
        })
    }
}

// ===== Typed update patch =====

/// Field-level patch for [`SqliteStorage::update_issue`].
///
/// `Some(None)` on an optional field clears it; `None` leaves it alone.
#[derive(Debug, Default, Clone)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    pub source_repo: Option<Option<String>>,
    pub close_reason: Option<Option<String>>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

impl IssueUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.external_ref.is_none()
            && self.source_repo.is_none()
            && self.close_reason.is_none()
            && self.closed_at.is_none()
    }

    /// Build a patch from a `field -> value` map (RPC and CLI callers).
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for unknown field names and a validation error
    /// when a value has the wrong type.
    pub fn from_map(map: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut update = Self::default();

        for (field, value) in map {
            match field.as_str() {
                "title" => update.title = Some(string_value(field, value)?),
                "description" => update.description = Some(opt_string_value(field, value)?),
                "design" => update.design = Some(opt_string_value(field, value)?),
                "acceptance_criteria" => {
                    update.acceptance_criteria = Some(opt_string_value(field, value)?);
                }
                "notes" => update.notes = Some(opt_string_value(field, value)?),
                "status" => update.status = Some(string_value(field, value)?.parse()?),
                "priority" => {
                    update.priority = Some(match value {
                        Value::Number(n) => {
                            let p = n.as_i64().unwrap_or(-1);
                            Priority(i32::try_from(p).map_err(|_| {
                                BeadsError::InvalidPriority {
                                    priority: i32::MAX,
                                }
                            })?)
                        }
                        Value::String(s) => s.parse()?,
                        _ => {
                            return Err(BeadsError::validation(field, "expected number or string"))
                        }
                    });
                    if let Some(p) = update.priority {
                        if !(0..=4).contains(&p.0) {
                            return Err(BeadsError::InvalidPriority { priority: p.0 });
                        }
                    }
                }
                "issue_type" | "type" => {
                    update.issue_type = Some(string_value(field, value)?.parse()?);
                }
                "assignee" => update.assignee = Some(opt_string_value(field, value)?),
                "external_ref" => update.external_ref = Some(opt_string_value(field, value)?),
                "source_repo" => update.source_repo = Some(opt_string_value(field, value)?),
                "close_reason" => update.close_reason = Some(opt_string_value(field, value)?),
                other => {
                    return Err(BeadsError::InvalidField {
                        field: other.to_string(),
                    })
                }
            }
        }

        Ok(update)
    }
}

fn string_value(field: &str, value: &Value) -> Result<String> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        BeadsError::validation(field, "expected string")
    })
}

fn opt_string_value(field: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(BeadsError::validation(field, "expected string or null")),
    }
}

// ===== Filters =====

/// Filters for list/search queries.
#[derive(Debug, Default, Clone)]
pub struct ListFilters {
    pub statuses: Option<Vec<Status>>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    pub include_closed: bool,
    pub limit: Option<usize>,
}

// ===== Row mapping =====

const ISSUE_COLUMNS: &str = "id, title, description, design, acceptance_criteria, notes,
       status, priority, issue_type, assignee, created_at, updated_at,
       closed_at, close_reason, external_ref, source_repo, compaction_level, compacted_at";

pub(crate) const ISSUE_SELECT: &str = "SELECT id, title, description, design, acceptance_criteria, notes,
       status, priority, issue_type, assignee, created_at, updated_at,
       closed_at, close_reason, external_ref, source_repo, compaction_level, compacted_at
       FROM issues";

const ISSUE_SELECT_BY_ID: &str = "SELECT id, title, description, design, acceptance_criteria, notes,
       status, priority, issue_type, assignee, created_at, updated_at,
       closed_at, close_reason, external_ref, source_repo, compaction_level, compacted_at
       FROM issues WHERE id = ?";

fn insert_issue_row_tx(tx: &Transaction, id: &str, issue: &Issue) -> Result<()> {
    let sql = format!("INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
    tx.execute(
        &sql,
        rusqlite::params![
            id,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority.0,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.created_at.to_rfc3339(),
            issue.updated_at.to_rfc3339(),
            issue.closed_at.map(|dt| dt.to_rfc3339()),
            issue.close_reason,
            issue.external_ref,
            issue.source_repo,
            issue.compaction_level,
            issue.compacted_at.map(|dt| dt.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub(crate) fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        design: row.get(3)?,
        acceptance_criteria: row.get(4)?,
        notes: row.get(5)?,
        status: parse_status(row.get::<_, Option<String>>(6)?.as_deref()),
        priority: Priority(row.get::<_, Option<i32>>(7)?.unwrap_or(2)),
        issue_type: parse_issue_type(row.get::<_, Option<String>>(8)?.as_deref()),
        assignee: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
        closed_at: row.get::<_, Option<String>>(12)?.as_deref().map(parse_datetime),
        close_reason: row.get(13)?,
        external_ref: row.get(14)?,
        source_repo: row.get(15)?,
        compaction_level: row.get(16)?,
        compacted_at: row
            .get::<_, Option<String>>(17)?
            .as_deref()
            .map(parse_datetime),
        labels: vec![],       // Loaded separately if needed
        dependencies: vec![], // Loaded separately if needed
        comments: vec![],     // Loaded separately if needed
    })
}

fn dependency_from_row(row: &rusqlite::Row) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        issue_id: row.get(0)?,
        depends_on_id: row.get(1)?,
        dep_type: parse_dep_type(row.get::<_, Option<String>>(2)?.as_deref()),
    })
}

fn comment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn event_from_row(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let event_type: String = row.get(2)?;
    Ok(Event {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        event_type: serde_json::from_value(Value::String(event_type.clone()))
            .unwrap_or(EventType::Custom(event_type)),
        actor: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        comment: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Lenient RFC 3339 parse; malformed values decay to the epoch rather than
/// failing a whole row scan.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_status(s: Option<&str>) -> Status {
    s.and_then(|v| v.parse().ok()).unwrap_or_default()
}

fn parse_issue_type(s: Option<&str>) -> IssueType {
    s.and_then(|v| v.parse().ok()).unwrap_or_default()
}

fn parse_dep_type(s: Option<&str>) -> DependencyType {
    s.and_then(|v| v.parse().ok())
        .unwrap_or(DependencyType::Related)
}

// ===== Counter helpers (transaction scope) =====

fn metadata_get_tx(tx: &Transaction, key: &str) -> Result<Option<String>> {
    let value = tx
        .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

fn counter_next_tx(tx: &Transaction, prefix: &str) -> Result<u64> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT last_number FROM counters WHERE prefix = ?",
            [prefix],
            |row| row.get(0),
        )
        .optional()?;
    let next = u64::try_from(current.unwrap_or(0)).unwrap_or(0) + 1;
    tx.execute(
        "INSERT OR REPLACE INTO counters (prefix, last_number) VALUES (?, ?)",
        rusqlite::params![prefix, i64::try_from(next).unwrap_or(i64::MAX)],
    )?;
    Ok(next)
}

fn counter_raise_tx(tx: &Transaction, prefix: &str, number: u64) -> Result<()> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT last_number FROM counters WHERE prefix = ?",
            [prefix],
            |row| row.get(0),
        )
        .optional()?;
    let current = u64::try_from(current.unwrap_or(0)).unwrap_or(0);
    if number > current {
        tx.execute(
            "INSERT OR REPLACE INTO counters (prefix, last_number) VALUES (?, ?)",
            rusqlite::params![prefix, i64::try_from(number).unwrap_or(i64::MAX)],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteStorage {
        let mut store = SqliteStorage::open_memory().unwrap();
        store.set_metadata(META_ISSUE_PREFIX, "bd").unwrap();
        store
    }

    fn create(store: &mut SqliteStorage, title: &str) -> Issue {
        store.create_issue(&Issue::new("", title), "tester").unwrap()
    }

    #[test]
    fn create_allocates_sequential_ids() {
        let mut store = make_store();
        let a = create(&mut store, "first");
        let b = create(&mut store, "second");
        assert_eq!(a.id, "bd-1");
        assert_eq!(b.id, "bd-2");
        assert_eq!(store.get_counter("bd").unwrap(), Some(2));
    }

    #[test]
    fn explicit_id_advances_counter() {
        let mut store = make_store();
        let issue = store
            .create_issue(&Issue::new("bd-10", "explicit"), "tester")
            .unwrap();
        assert_eq!(issue.id, "bd-10");
        let next = create(&mut store, "after");
        assert_eq!(next.id, "bd-11");
    }

    #[test]
    fn create_marks_dirty() {
        let mut store = make_store();
        let issue = create(&mut store, "dirty one");
        assert_eq!(store.get_dirty_issue_ids().unwrap(), vec![issue.id]);
    }

    #[test]
    fn update_bumps_updated_at_only_on_change() {
        let mut store = make_store();
        let issue = create(&mut store, "stable");
        let before = store.get_issue(&issue.id).unwrap().unwrap().updated_at;

        // Same title: no-op
        let update = IssueUpdate {
            title: Some("stable".to_string()),
            ..IssueUpdate::default()
        };
        std::thread::sleep(std::time::Duration::from_millis(5));
        let after = store.update_issue(&issue.id, &update, "tester").unwrap();
        assert_eq!(after.updated_at, before);

        // Real change bumps
        let update = IssueUpdate {
            title: Some("renamed".to_string()),
            ..IssueUpdate::default()
        };
        let after = store.update_issue(&issue.id, &update, "tester").unwrap();
        assert!(after.updated_at > before);
    }

    #[test]
    fn update_from_map_rejects_unknown_field() {
        let map: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"not_a_field": "x"}"#).unwrap();
        assert!(matches!(
            IssueUpdate::from_map(&map),
            Err(BeadsError::InvalidField { .. })
        ));
    }

    #[test]
    fn update_from_map_type_checks() {
        let map: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"title": 42}"#).unwrap();
        assert!(matches!(
            IssueUpdate::from_map(&map),
            Err(BeadsError::Validation { .. })
        ));
    }

    #[test]
    fn close_sets_closed_at() {
        let mut store = make_store();
        let issue = create(&mut store, "to close");
        let closed = store
            .close_issue(&issue.id, Some("done"), "tester")
            .unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.close_reason.as_deref(), Some("done"));
    }

    #[test]
    fn reopen_clears_closed_at() {
        let mut store = make_store();
        let issue = create(&mut store, "cycle me");
        store.close_issue(&issue.id, None, "tester").unwrap();

        let update = IssueUpdate {
            status: Some(Status::Open),
            ..IssueUpdate::default()
        };
        let reopened = store.update_issue(&issue.id, &update, "tester").unwrap();
        assert_eq!(reopened.status, Status::Open);
        assert!(reopened.closed_at.is_none());
    }

    #[test]
    fn delete_cascades_everything() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        store
            .add_dependency(
                &Dependency {
                    issue_id: b.id.clone(),
                    depends_on_id: a.id.clone(),
                    dep_type: DependencyType::Blocks,
                },
                "tester",
            )
            .unwrap();
        store.add_label(&a.id, "keep", "tester").unwrap();
        store.add_comment(&a.id, "tester", "note").unwrap();

        store.delete_issue(&a.id, "tester").unwrap();

        assert!(store.get_issue(&a.id).unwrap().is_none());
        assert!(store.all_dependency_records().unwrap().is_empty());
        assert!(store.get_labels(&a.id).unwrap().is_empty());
        assert!(store.get_comments(&a.id).unwrap().is_empty());
        assert!(store.get_events(&a.id).unwrap().is_empty());
        // The surviving endpoint re-exports its dependency list
        assert!(store.get_dirty_issue_ids().unwrap().contains(&b.id));
    }

    #[test]
    fn delete_issues_reports_orphans() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        store
            .add_dependency(
                &Dependency {
                    issue_id: b.id.clone(),
                    depends_on_id: a.id.clone(),
                    dep_type: DependencyType::Blocks,
                },
                "tester",
            )
            .unwrap();

        let err = store
            .delete_issues(&[a.id.clone()], false, false, false, "tester")
            .unwrap_err();
        assert!(matches!(err, BeadsError::Validation { .. }));

        let result = store
            .delete_issues(&[a.id.clone()], true, false, true, "tester")
            .unwrap();
        assert_eq!(result.deleted_count, 2); // cascade pulled b in
        assert!(store.get_issue(&a.id).unwrap().is_some()); // dry run

        let result = store
            .delete_issues(&[a.id.clone()], true, false, false, "tester")
            .unwrap();
        assert_eq!(result.deleted_count, 2);
        assert!(store.get_issue(&b.id).unwrap().is_none());
    }

    #[test]
    fn duplicate_dependency_rejected() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        let dep = Dependency {
            issue_id: b.id.clone(),
            depends_on_id: a.id.clone(),
            dep_type: DependencyType::Blocks,
        };
        store.add_dependency(&dep, "tester").unwrap();
        assert!(matches!(
            store.add_dependency(&dep, "tester"),
            Err(BeadsError::DuplicateDependency { .. })
        ));
    }

    #[test]
    fn reversed_parent_child_rejected() {
        let mut store = make_store();
        let parent = create(&mut store, "parent");
        let child = create(&mut store, "child");
        store
            .add_dependency(
                &Dependency {
                    issue_id: child.id.clone(),
                    depends_on_id: parent.id.clone(),
                    dep_type: DependencyType::ParentChild,
                },
                "tester",
            )
            .unwrap();

        assert!(matches!(
            store.add_dependency(
                &Dependency {
                    issue_id: parent.id.clone(),
                    depends_on_id: child.id.clone(),
                    dep_type: DependencyType::ParentChild,
                },
                "tester",
            ),
            Err(BeadsError::InvalidParentChild { .. })
        ));
    }

    #[test]
    fn update_issue_id_rewrites_relations() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        store
            .add_dependency(
                &Dependency {
                    issue_id: b.id.clone(),
                    depends_on_id: a.id.clone(),
                    dep_type: DependencyType::Blocks,
                },
                "tester",
            )
            .unwrap();
        store.add_label(&a.id, "tag", "tester").unwrap();

        store.update_issue_id(&a.id, "bd-50", "tester").unwrap();

        assert!(store.get_issue(&a.id).unwrap().is_none());
        assert!(store.get_issue("bd-50").unwrap().is_some());
        assert_eq!(store.get_dependencies(&b.id).unwrap(), vec!["bd-50"]);
        assert_eq!(store.get_labels("bd-50").unwrap(), vec!["tag"]);
        // counter advanced past the explicit number
        assert!(store.get_counter("bd").unwrap().unwrap() >= 50);
    }

    #[test]
    fn sync_all_counters_never_decrements() {
        let mut store = make_store();
        store
            .create_issue(&Issue::new("bd-7", "seven"), "tester")
            .unwrap();
        store.reset_counter("bd", 100).unwrap();
        store.sync_all_counters().unwrap();
        assert_eq!(store.get_counter("bd").unwrap(), Some(100));
    }

    #[test]
    fn orphaned_dependency_repair() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        store
            .add_dependency(
                &Dependency {
                    issue_id: b.id.clone(),
                    depends_on_id: a.id.clone(),
                    dep_type: DependencyType::Blocks,
                },
                "tester",
            )
            .unwrap();

        // Remove the row out from under the edge
        store
            .mutate("test_raw_delete", "tester", |tx, _ctx| {
                tx.execute("DELETE FROM issues WHERE id = ?", [a.id.as_str()])?;
                Ok(())
            })
            .unwrap();

        let removed = store.remove_orphaned_dependencies("tester").unwrap();
        assert_eq!(removed, 1);
        assert!(store.all_dependency_records().unwrap().is_empty());
    }

    #[test]
    fn remark_during_export_window_survives_clear() {
        let mut store = make_store();
        let issue = create(&mut store, "racy");

        // The exporter reads the dirty set and captures its cutoff...
        let cutoff = Utc::now();
        let read_ids = store.get_dirty_issue_ids().unwrap();
        assert_eq!(read_ids, vec![issue.id.clone()]);

        // ...then a mutation from another process lands...
        std::thread::sleep(std::time::Duration::from_millis(5));
        let update = IssueUpdate {
            notes: Some(Some("landed mid-flush".to_string())),
            ..IssueUpdate::default()
        };
        store.update_issue(&issue.id, &update, "tester").unwrap();

        // ...and the exporter's clear must not eat the new mark.
        store.clear_dirty_issues_before(&read_ids, cutoff).unwrap();
        assert_eq!(store.get_dirty_issue_ids().unwrap(), vec![issue.id]);
    }

    #[test]
    fn mutation_failure_leaves_dirty_set_unchanged() {
        let mut store = make_store();
        let issue = create(&mut store, "keeper");
        store.clear_dirty_issues(&[issue.id.clone()]).unwrap();

        let result: Result<()> = store.mutate("failing_op", "tester", |_tx, ctx| {
            ctx.mark_dirty(&issue.id);
            Err(BeadsError::validation("field", "forced failure"))
        });
        assert!(result.is_err());
        assert!(store.get_dirty_issue_ids().unwrap().is_empty());
    }
}
