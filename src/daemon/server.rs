//! Unix-socket RPC server and the mutation event stream.
//!
//! Clients are accepted concurrently; each connection is a loop of
//! length-prefixed request/response frames. Every successful mutation emits
//! a `{type, issue_id}` event on a bounded channel; when a consumer falls
//! behind, events are dropped and counted so the event loop's safety net
//! can force an export.

use crate::daemon::protocol::{read_frame, write_frame, Request, Response};
use crate::daemon::SharedCore;
use crate::error::{BeadsError, Result};
use crate::model::{Dependency, Issue};
use crate::storage::{IssueUpdate, ListFilters, ReadyFilters, SortPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};

/// A successful mutation observed by the RPC server.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub event_type: String,
    pub issue_id: String,
}

/// RPC server state shared across connections.
pub struct RpcServer {
    core: SharedCore,
    mutation_tx: mpsc::Sender<MutationEvent>,
    dropped: AtomicU64,
}

impl RpcServer {
    /// Build the server plus the receiving end of the mutation stream.
    #[must_use]
    pub fn new(core: SharedCore, capacity: usize) -> (Arc<Self>, mpsc::Receiver<MutationEvent>) {
        let (mutation_tx, mutation_rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                core,
                mutation_tx,
                dropped: AtomicU64::new(0),
            }),
            mutation_rx,
        )
    }

    /// Events dropped since the last reset.
    #[must_use]
    pub fn dropped_events_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Read-and-zero the dropped counter; the safety-net ticker uses a
    /// nonzero return to force an export.
    #[must_use]
    pub fn reset_dropped_events_count(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Accept connections until `shutdown` flips.
    pub async fn serve(self: Arc<Self>, listener: UnixListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let server = Arc::clone(&self);
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, conn_shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream, mut shutdown: watch::Receiver<bool>) {
        loop {
            let payload = tokio::select! {
                frame = read_frame(&mut stream) => match frame {
                    Ok(payload) => payload,
                    Err(_) => break, // EOF or protocol error: connection done
                },
                _ = shutdown.changed() => break,
            };

            let response = match crate::daemon::protocol::decode::<Request>(&payload) {
                Ok(request) => self.dispatch(&request),
                Err(e) => Response::err(format!("malformed request: {e}")),
            };

            if write_frame(&mut stream, &response).await.is_err() {
                break;
            }
        }
    }

    fn emit(&self, event_type: &str, issue_id: &str) {
        let event = MutationEvent {
            event_type: event_type.to_string(),
            issue_id: issue_id.to_string(),
        };
        if self.mutation_tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Route one request. Never panics; every failure is a `Response::err`.
    fn dispatch(&self, request: &Request) -> Response {
        let result = match request.op.as_str() {
            "create" => self.op_create(&request.args),
            "update" => self.op_update(&request.args),
            "close" => self.op_close(&request.args),
            "list" => self.op_list(&request.args),
            "ready" => self.op_ready(&request.args),
            "stats" => self.op_stats(),
            "dep_add" => self.op_dep_add(&request.args),
            "dep_remove" => self.op_dep_remove(&request.args),
            "comment_list" => self.op_comment_list(&request.args),
            "comment_add" => self.op_comment_add(&request.args),
            "epic_status" => self.op_epic_status(&request.args),
            "health" => self.op_health(),
            "metrics" => self.op_metrics(),
            // Routable but outside this daemon's feature set. Answering
            // structurally (not "unknown operation") keeps clients from
            // misclassifying them as protocol failures.
            "repos_list" | "repos_ready" | "repos_stats" | "repos_clear_cache" | "compact"
            | "compact_stats" => Ok(json!({"supported": false})),
            _ => return Response::unknown_operation(),
        };

        match result {
            Ok(data) => Response::ok(data),
            Err(e) => Response::err(e.to_string()),
        }
    }

    fn op_create(&self, args: &Value) -> Result<Value> {
        let title = required_str(args, "title")?;
        let mut issue = Issue::new(String::new(), title);
        if let Some(description) = optional_str(args, "description") {
            issue.description = Some(description);
        }
        if let Some(priority) = args.get("priority").and_then(Value::as_i64) {
            issue.priority = crate::model::Priority(i32::try_from(priority).unwrap_or(2));
        }
        if let Some(issue_type) = optional_str(args, "issue_type") {
            issue.issue_type = issue_type.parse()?;
        }
        if let Some(assignee) = optional_str(args, "assignee") {
            issue.assignee = Some(assignee);
        }
        if let Some(labels) = args.get("labels").and_then(Value::as_array) {
            issue.labels = labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }

        let mut core = self.core_lock();
        let actor = core.actor.clone();
        let created = core.storage.create_issue(&issue, &actor)?;
        drop(core);
        self.emit("create", &created.id);
        Ok(serde_json::to_value(created)?)
    }

    fn op_update(&self, args: &Value) -> Result<Value> {
        let id = required_str(args, "id")?;
        let fields = args
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| BeadsError::validation("fields", "expected object"))?;
        let update = IssueUpdate::from_map(fields)?;

        let mut core = self.core_lock();
        let actor = core.actor.clone();
        let updated = core.storage.update_issue(&id, &update, &actor)?;
        drop(core);
        self.emit("update", &id);
        Ok(serde_json::to_value(updated)?)
    }

    fn op_close(&self, args: &Value) -> Result<Value> {
        let id = required_str(args, "id")?;
        let reason = optional_str(args, "reason");

        let mut core = self.core_lock();
        let actor = core.actor.clone();
        let closed = core.storage.close_issue(&id, reason.as_deref(), &actor)?;
        drop(core);
        self.emit("close", &id);
        Ok(serde_json::to_value(closed)?)
    }

    fn op_list(&self, args: &Value) -> Result<Value> {
        let mut filters = ListFilters {
            include_closed: args
                .get("include_closed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            ..ListFilters::default()
        };
        if let Some(status) = optional_str(args, "status") {
            filters.statuses = Some(vec![status.parse()?]);
        }
        if let Some(assignee) = optional_str(args, "assignee") {
            filters.assignee = Some(assignee);
        }
        if let Some(limit) = args.get("limit").and_then(Value::as_u64) {
            filters.limit = Some(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        let core = self.core_lock();
        let issues = core.storage.list_issues(&filters)?;
        Ok(serde_json::to_value(issues)?)
    }

    fn op_ready(&self, args: &Value) -> Result<Value> {
        let mut filters = ReadyFilters::default();
        if let Some(limit) = args.get("limit").and_then(Value::as_u64) {
            filters.limit = Some(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        if let Some(assignee) = optional_str(args, "assignee") {
            filters.assignee = Some(assignee);
        }
        let sort: SortPolicy = optional_str(args, "sort")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();

        let core = self.core_lock();
        let issues = core.storage.get_ready_work(&filters, sort)?;
        Ok(serde_json::to_value(issues)?)
    }

    fn op_stats(&self) -> Result<Value> {
        let core = self.core_lock();
        let all = core.storage.list_issues(&ListFilters {
            include_closed: true,
            ..ListFilters::default()
        })?;
        let ready = core
            .storage
            .get_ready_work(&ReadyFilters::default(), SortPolicy::default())?;
        let blocked = core.storage.get_blocked_issues()?;

        let count_status = |status: crate::model::Status| -> usize {
            all.iter().filter(|i| i.status == status).count()
        };

        Ok(json!({
            "total": all.len(),
            "open": count_status(crate::model::Status::Open),
            "in_progress": count_status(crate::model::Status::InProgress),
            "blocked_status": count_status(crate::model::Status::Blocked),
            "closed": count_status(crate::model::Status::Closed),
            "ready": ready.len(),
            "blocked": blocked.len(),
        }))
    }

    fn op_dep_add(&self, args: &Value) -> Result<Value> {
        let issue_id = required_str(args, "issue_id")?;
        let depends_on_id = required_str(args, "depends_on_id")?;
        let dep_type = optional_str(args, "type")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(crate::model::DependencyType::Blocks);

        let dep = Dependency {
            issue_id: issue_id.clone(),
            depends_on_id,
            dep_type,
        };
        let mut core = self.core_lock();
        let actor = core.actor.clone();
        core.storage.add_dependency(&dep, &actor)?;
        drop(core);
        self.emit("dep_add", &issue_id);
        Ok(json!({"added": true}))
    }

    fn op_dep_remove(&self, args: &Value) -> Result<Value> {
        let issue_id = required_str(args, "issue_id")?;
        let depends_on_id = required_str(args, "depends_on_id")?;

        let mut core = self.core_lock();
        let actor = core.actor.clone();
        core.storage
            .remove_dependency(&issue_id, &depends_on_id, &actor)?;
        drop(core);
        self.emit("dep_remove", &issue_id);
        Ok(json!({"removed": true}))
    }

    fn op_comment_list(&self, args: &Value) -> Result<Value> {
        let id = required_str(args, "id")?;
        let core = self.core_lock();
        let comments = core.storage.get_comments(&id)?;
        Ok(serde_json::to_value(comments)?)
    }

    fn op_comment_add(&self, args: &Value) -> Result<Value> {
        let id = required_str(args, "id")?;
        let text = required_str(args, "text")?;

        let mut core = self.core_lock();
        let author = optional_str(args, "author").unwrap_or_else(|| core.actor.clone());
        let comment = core.storage.add_comment(&id, &author, &text)?;
        drop(core);
        self.emit("comment_add", &id);
        Ok(serde_json::to_value(comment)?)
    }

    fn op_epic_status(&self, args: &Value) -> Result<Value> {
        let id = required_str(args, "id")?;
        let core = self.core_lock();
        let status = core.storage.get_epic_status(&id)?;
        Ok(serde_json::to_value(status)?)
    }

    fn op_health(&self) -> Result<Value> {
        let core = self.core_lock();
        let issues = core.storage.count_issues()?;
        Ok(json!({"healthy": true, "issues": issues}))
    }

    fn op_metrics(&self) -> Result<Value> {
        let core = self.core_lock();
        let dirty = core.storage.get_dirty_issue_ids()?.len();
        let issues = core.storage.count_issues()?;
        let timestamp_only_dirty = core.storage.count_timestamp_only_dirty()?;
        Ok(json!({
            "issues": issues,
            "dirty": dirty,
            "timestamp_only_dirty": timestamp_only_dirty,
            "dropped_events": self.dropped_events_count(),
            "flush_failures": core.flush.failure_count(),
        }))
    }

    fn core_lock(&self) -> std::sync::MutexGuard<'_, crate::daemon::DaemonCore> {
        // A poisoned mutex means a handler panicked; the daemon logs and
        // exits rather than serving from suspect state.
        match self.core.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn required_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BeadsError::validation(key, "required string argument"))
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Bind the daemon socket, replacing a stale file from a dead process.
///
/// # Errors
///
/// Returns `Io` if the socket cannot be bound.
pub fn bind_socket(path: &std::path::Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspacePaths;
    use crate::daemon::DaemonCore;
    use crate::storage::{SqliteStorage, META_ISSUE_PREFIX};
    use crate::sync::flush::FlushState;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn make_core(temp: &TempDir) -> SharedCore {
        let beads_dir = temp.path().join(".beads");
        std::fs::create_dir_all(&beads_dir).unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.set_metadata(META_ISSUE_PREFIX, "bd").unwrap();
        Arc::new(Mutex::new(DaemonCore {
            storage,
            paths: WorkspacePaths {
                db_path: beads_dir.join("issues.db"),
                jsonl_path: beads_dir.join("issues.jsonl"),
                beads_dir,
            },
            actor: "daemon-test".to_string(),
            flush: FlushState::new(),
        }))
    }

    fn call(server: &Arc<RpcServer>, op: &str, args: Value) -> Response {
        server.dispatch(&Request {
            op: op.to_string(),
            args,
        })
    }

    #[tokio::test]
    async fn create_then_ready_round_trip() {
        let temp = TempDir::new().unwrap();
        let (server, mut mutation_rx) = RpcServer::new(make_core(&temp), 16);

        let response = call(&server, "create", json!({"title": "from rpc"}));
        assert!(response.success, "error: {:?}", response.error);
        let id = response.data.unwrap()["id"].as_str().unwrap().to_string();
        assert_eq!(id, "bd-1");

        // The mutation event stream saw it.
        let event = mutation_rx.recv().await.unwrap();
        assert_eq!(event.event_type, "create");
        assert_eq!(event.issue_id, "bd-1");

        let response = call(&server, "ready", json!({}));
        assert!(response.success);
        let issues = response.data.unwrap();
        assert_eq!(issues.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_operation_error_is_exact() {
        let temp = TempDir::new().unwrap();
        let (server, _rx) = RpcServer::new(make_core(&temp), 16);
        let response = call(&server, "frobnicate", json!({}));
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("unknown operation"));
    }

    #[tokio::test]
    async fn out_of_scope_ops_are_routable() {
        let temp = TempDir::new().unwrap();
        let (server, _rx) = RpcServer::new(make_core(&temp), 16);
        for op in [
            "repos_list",
            "repos_ready",
            "repos_stats",
            "repos_clear_cache",
            "compact",
            "compact_stats",
        ] {
            let response = call(&server, op, json!({}));
            assert!(response.success, "{op} should be routable");
            assert_eq!(response.data.unwrap()["supported"], false);
        }
    }

    #[tokio::test]
    async fn update_rejects_unknown_field() {
        let temp = TempDir::new().unwrap();
        let (server, _rx) = RpcServer::new(make_core(&temp), 16);

        call(&server, "create", json!({"title": "target"}));
        let response = call(
            &server,
            "update",
            json!({"id": "bd-1", "fields": {"bogus": 1}}),
        );
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Invalid field"));
    }

    #[tokio::test]
    async fn dropped_events_are_counted_and_resettable() {
        let temp = TempDir::new().unwrap();
        // Capacity 1: the second event in a burst is dropped.
        let (server, _rx) = RpcServer::new(make_core(&temp), 1);

        call(&server, "create", json!({"title": "one"}));
        call(&server, "create", json!({"title": "two"}));
        call(&server, "create", json!({"title": "three"}));

        assert!(server.dropped_events_count() >= 1);
        let drained = server.reset_dropped_events_count();
        assert!(drained >= 1);
        assert_eq!(server.dropped_events_count(), 0);
    }

    #[tokio::test]
    async fn epic_status_rolls_up_children() {
        let temp = TempDir::new().unwrap();
        let (server, _rx) = RpcServer::new(make_core(&temp), 16);

        call(
            &server,
            "create",
            json!({"title": "the epic", "issue_type": "epic"}),
        );
        call(&server, "create", json!({"title": "child"}));
        let response = call(
            &server,
            "dep_add",
            json!({"issue_id": "bd-2", "depends_on_id": "bd-1", "type": "parent-child"}),
        );
        assert!(response.success, "error: {:?}", response.error);

        let response = call(&server, "epic_status", json!({"id": "bd-1"}));
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["total_children"], 1);
        assert_eq!(data["closed_children"], 0);
        assert_eq!(data["eligible_for_close"], false);

        call(&server, "close", json!({"id": "bd-2"}));
        let response = call(&server, "epic_status", json!({"id": "bd-1"}));
        let data = response.data.unwrap();
        assert_eq!(data["closed_children"], 1);
        assert_eq!(data["eligible_for_close"], true);
    }
}
