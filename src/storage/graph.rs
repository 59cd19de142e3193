//! Dependency-graph queries: ready work, blocked work, trees, cycles.
//!
//! Only `blocks` and `parent-child` edges gate scheduling; `related` and
//! `discovered-from` are informational.

use crate::error::{BeadsError, Result};
use crate::model::{Issue, IssueType, Priority};
use crate::storage::sqlite::{issue_from_row, SqliteStorage, ISSUE_SELECT};
use rusqlite::OptionalExtension;
use std::collections::{HashMap, HashSet, VecDeque};

/// Filters for ready-work queries.
#[derive(Debug, Default, Clone)]
pub struct ReadyFilters {
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub limit: Option<usize>,
}

/// Sort policy for ready work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortPolicy {
    /// Priority ascending, then oldest first; issues touched in the last
    /// 24 hours sink behind untouched peers of the same priority.
    #[default]
    Hybrid,
    /// Strict priority, ties by creation time.
    Priority,
    /// Strict creation time.
    Oldest,
}

impl std::str::FromStr for SortPolicy {
    type Err = BeadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "priority" => Ok(Self::Priority),
            "oldest" => Ok(Self::Oldest),
            other => Err(BeadsError::validation(
                "sort",
                format!("unknown sort policy '{other}'"),
            )),
        }
    }
}

/// One node of a dependency tree traversal.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TreeNode {
    pub issue: Issue,
    pub depth: usize,
    pub parent_id: Option<String>,
    /// Set when the traversal stopped here because of the depth bound.
    pub truncated: bool,
}

/// Recency floor for the hybrid sort, in hours.
const HYBRID_RECENCY_FLOOR_HOURS: i64 = 24;

impl SqliteStorage {
    /// Issues that are open or in progress with no open blocking
    /// predecessor, filtered and sorted per policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_ready_work(&self, filters: &ReadyFilters, sort: SortPolicy) -> Result<Vec<Issue>> {
        let blocked = self.get_blocked_ids()?;

        let mut sql = String::from(ISSUE_SELECT);
        sql.push_str(" WHERE status IN ('open', 'in_progress')");

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(priority) = filters.priority {
            sql.push_str(" AND priority = ?");
            params.push(Box::new(priority.0));
        }
        if let Some(issue_type) = filters.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(ref assignee) = filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }

        match sort {
            SortPolicy::Hybrid => {
                // Timestamps are stored as RFC 3339, so the recency floor is
                // computed here and compared textually.
                let floor = (chrono::Utc::now()
                    - chrono::Duration::hours(HYBRID_RECENCY_FLOOR_HOURS))
                .to_rfc3339();
                sql.push_str(
                    " ORDER BY priority ASC,
                      CASE WHEN updated_at >= ? THEN 1 ELSE 0 END ASC,
                      created_at ASC",
                );
                params.push(Box::new(floor));
            }
            SortPolicy::Priority => {
                sql.push_str(" ORDER BY priority ASC, created_at ASC");
            }
            SortPolicy::Oldest => {
                sql.push_str(" ORDER BY created_at ASC");
            }
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut issues: Vec<Issue> = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        issues.retain(|issue| !blocked.contains(&issue.id));

        if let Some(limit) = filters.limit {
            if limit > 0 && issues.len() > limit {
                issues.truncate(limit);
            }
        }

        Ok(issues)
    }

    /// IDs with at least one open blocking predecessor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_blocked_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT d.issue_id
             FROM dependencies d
             JOIN issues pred ON pred.id = d.depends_on_id
             WHERE d.type IN ('blocks', 'parent-child')
               AND pred.status != 'closed'",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    /// Blocked issues with the IDs of their open blocking predecessors.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_blocked_issues(&self) -> Result<Vec<(Issue, Vec<String>)>> {
        let mut stmt = self.conn().prepare(
            "SELECT d.issue_id, d.depends_on_id
             FROM dependencies d
             JOIN issues pred ON pred.id = d.depends_on_id
             WHERE d.type IN ('blocks', 'parent-child')
               AND pred.status != 'closed'
             ORDER BY d.issue_id, d.depends_on_id",
        )?;
        let edges: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut blockers: HashMap<String, Vec<String>> = HashMap::new();
        for (issue_id, blocker) in edges {
            blockers.entry(issue_id).or_default().push(blocker);
        }

        let mut result = Vec::new();
        let mut ids: Vec<String> = blockers.keys().cloned().collect();
        ids.sort();
        for id in ids {
            if let Some(issue) = self.get_issue(&id)? {
                if issue.status != crate::model::Status::Closed {
                    let open_blockers = blockers.remove(&id).unwrap_or_default();
                    result.push((issue, open_blockers));
                }
            }
        }

        Ok(result)
    }

    /// Would adding `issue_id -> depends_on_id` close a blocking cycle?
    ///
    /// Checks whether `issue_id` is already reachable from `depends_on_id`
    /// through blocking edges, via a recursive CTE.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn would_create_cycle(&self, issue_id: &str, depends_on_id: &str) -> Result<bool> {
        let query = r"
            WITH RECURSIVE transitive_deps(id) AS (
                SELECT depends_on_id FROM dependencies
                WHERE issue_id = ?1 AND type IN ('blocks', 'parent-child')
                UNION
                SELECT d.depends_on_id
                FROM dependencies d
                JOIN transitive_deps td ON d.issue_id = td.id
                WHERE d.type IN ('blocks', 'parent-child')
            )
            SELECT 1 FROM transitive_deps WHERE id = ?2 LIMIT 1;
        ";

        let exists: bool = self
            .conn()
            .query_row(query, rusqlite::params![depends_on_id, issue_id], |_| {
                Ok(true)
            })
            .optional()?
            .unwrap_or(false);

        Ok(exists)
    }

    /// BFS from `root`, bounded by `max_depth`.
    ///
    /// With `all_paths` set, nodes reachable along several paths appear once
    /// per path (diamond visualization); otherwise each node appears once.
    /// Nodes at the depth bound that still have outgoing edges are flagged
    /// `truncated`.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` when the root is missing.
    pub fn get_dependency_tree(
        &self,
        root: &str,
        max_depth: usize,
        all_paths: bool,
    ) -> Result<Vec<TreeNode>> {
        let root_issue = self
            .get_issue(root)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: root.to_string(),
            })?;

        let mut nodes = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize, Option<String>, Vec<String>)> = VecDeque::new();

        queue.push_back((root_issue.id.clone(), 0, None, vec![root_issue.id.clone()]));
        visited.insert(root_issue.id.clone());

        while let Some((id, depth, parent_id, path)) = queue.pop_front() {
            let Some(issue) = self.get_issue(&id)? else {
                continue;
            };
            let children = self.get_dependencies(&id)?;
            let truncated = depth == max_depth && !children.is_empty();

            nodes.push(TreeNode {
                issue,
                depth,
                parent_id,
                truncated,
            });

            if depth == max_depth {
                continue;
            }

            for child in children {
                if all_paths {
                    // Per-path tracking: only block true cycles along this path.
                    if path.contains(&child) {
                        continue;
                    }
                } else if !visited.insert(child.clone()) {
                    continue;
                }
                let mut child_path = path.clone();
                child_path.push(child.clone());
                queue.push_back((child, depth + 1, Some(id.clone()), child_path));
            }
        }

        Ok(nodes)
    }

    /// Roll up an epic's children (parent-child edges pointing at it).
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` when the epic is missing.
    pub fn get_epic_status(&self, id: &str) -> Result<crate::model::EpicStatus> {
        let epic = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        let mut stmt = self.conn().prepare(
            "SELECT i.status FROM dependencies d
             JOIN issues i ON i.id = d.issue_id
             WHERE d.depends_on_id = ? AND d.type = 'parent-child'",
        )?;
        let statuses: Vec<String> = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let total_children = statuses.len();
        let closed_children = statuses.iter().filter(|s| s.as_str() == "closed").count();
        let eligible_for_close = total_children > 0
            && closed_children == total_children
            && epic.status != crate::model::Status::Closed;

        Ok(crate::model::EpicStatus {
            epic,
            total_children,
            closed_children,
            eligible_for_close,
        })
    }

    /// Find all cycles through blocking edges.
    ///
    /// Iterative colored DFS (no recursion, deep graphs are fine). Returns
    /// each cycle as the list of issues along it; an acyclic graph returns
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn detect_cycles(&self) -> Result<Vec<Vec<Issue>>> {
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt = self.conn().prepare(
            "SELECT issue_id, depends_on_id FROM dependencies WHERE type IN ('blocks', 'parent-child')",
        )?;
        let edges = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for edge in edges {
            let (from, to) = edge?;
            graph.entry(from).or_default().push(to);
        }
        drop(stmt);

        let mut id_cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        // Stack stores (node_id, neighbor_index)
        let mut stack: Vec<(String, usize)> = Vec::new();

        let mut keys: Vec<_> = graph.keys().cloned().collect();
        keys.sort();

        for node in keys {
            if visited.contains(&node) {
                continue;
            }

            stack.push((node.clone(), 0));
            visited.insert(node.clone());
            rec_stack.insert(node.clone());
            path.push(node);

            while let Some((u, idx)) = stack.last_mut() {
                if let Some(neighbors) = graph.get(u) {
                    if *idx < neighbors.len() {
                        let v = neighbors[*idx].clone();
                        *idx += 1;

                        if rec_stack.contains(&v) {
                            if let Some(start_pos) = path.iter().position(|x| *x == v) {
                                id_cycles.push(path[start_pos..].to_vec());
                            }
                        } else if !visited.contains(&v) {
                            visited.insert(v.clone());
                            rec_stack.insert(v.clone());
                            path.push(v.clone());
                            stack.push((v, 0));
                        }
                        continue;
                    }
                }

                // Finished all neighbors of u
                rec_stack.remove(u);
                path.pop();
                stack.pop();
            }
        }

        let mut cycles = Vec::new();
        for id_cycle in id_cycles {
            let mut issues = Vec::new();
            for id in id_cycle {
                if let Some(issue) = self.get_issue(&id)? {
                    issues.push(issue);
                }
            }
            if !issues.is_empty() {
                cycles.push(issues);
            }
        }

        Ok(cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DependencyType, Issue};
    use crate::storage::sqlite::META_ISSUE_PREFIX;

    fn make_store() -> SqliteStorage {
        let mut store = SqliteStorage::open_memory().unwrap();
        store.set_metadata(META_ISSUE_PREFIX, "bd").unwrap();
        store
    }

    fn create(store: &mut SqliteStorage, title: &str) -> Issue {
        store
            .create_issue(&Issue::new("", title), "tester")
            .unwrap()
    }

    fn link(store: &mut SqliteStorage, from: &str, to: &str, dep_type: DependencyType) {
        store
            .add_dependency(
                &Dependency {
                    issue_id: from.to_string(),
                    depends_on_id: to.to_string(),
                    dep_type,
                },
                "tester",
            )
            .unwrap();
    }

    #[test]
    fn ready_work_excludes_blocked_until_predecessor_closes() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        link(&mut store, &b.id, &a.id, DependencyType::Blocks);

        let ready = store
            .get_ready_work(&ReadyFilters::default(), SortPolicy::Priority)
            .unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&a.id.as_str()));
        assert!(!ids.contains(&b.id.as_str()));

        store.close_issue(&a.id, None, "tester").unwrap();
        let ready = store
            .get_ready_work(&ReadyFilters::default(), SortPolicy::Priority)
            .unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&b.id.as_str()));
    }

    #[test]
    fn related_edges_do_not_block() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        link(&mut store, &b.id, &a.id, DependencyType::Related);

        let ready = store
            .get_ready_work(&ReadyFilters::default(), SortPolicy::Oldest)
            .unwrap();
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn cycle_prevented_and_graph_stays_clean() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        let c = create(&mut store, "c");
        link(&mut store, &a.id, &b.id, DependencyType::Blocks);
        link(&mut store, &b.id, &c.id, DependencyType::Blocks);

        let err = store
            .add_dependency(
                &Dependency {
                    issue_id: c.id.clone(),
                    depends_on_id: a.id.clone(),
                    dep_type: DependencyType::Blocks,
                },
                "tester",
            )
            .unwrap_err();
        assert!(matches!(err, BeadsError::DependencyCycle { .. }));
        assert!(store.detect_cycles().unwrap().is_empty());
    }

    #[test]
    fn detect_cycles_finds_raw_cycle() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        // Bypass add_dependency validation to simulate imported bad data
        store
            .mutate("test_raw_edges", "tester", |tx, _ctx| {
                tx.execute(
                    "INSERT INTO dependencies (issue_id, depends_on_id, type) VALUES (?, ?, 'blocks')",
                    rusqlite::params![a.id, b.id],
                )?;
                tx.execute(
                    "INSERT INTO dependencies (issue_id, depends_on_id, type) VALUES (?, ?, 'blocks')",
                    rusqlite::params![b.id, a.id],
                )?;
                Ok(())
            })
            .unwrap();

        let cycles = store.detect_cycles().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
    }

    #[test]
    fn blocked_issues_report_open_predecessors() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        link(&mut store, &b.id, &a.id, DependencyType::Blocks);

        let blocked = store.get_blocked_issues().unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0.id, b.id);
        assert_eq!(blocked[0].1, vec![a.id]);
    }

    #[test]
    fn dependency_tree_depth_and_truncation() {
        let mut store = make_store();
        let a = create(&mut store, "a");
        let b = create(&mut store, "b");
        let c = create(&mut store, "c");
        link(&mut store, &a.id, &b.id, DependencyType::Blocks);
        link(&mut store, &b.id, &c.id, DependencyType::Blocks);

        let tree = store.get_dependency_tree(&a.id, 1, false).unwrap();
        assert_eq!(tree.len(), 2); // a and b; c is beyond the bound
        let b_node = tree.iter().find(|n| n.issue.id == b.id).unwrap();
        assert_eq!(b_node.depth, 1);
        assert_eq!(b_node.parent_id.as_deref(), Some(a.id.as_str()));
        assert!(b_node.truncated);
    }

    #[test]
    fn dependency_tree_diamond_all_paths() {
        let mut store = make_store();
        let top = create(&mut store, "top");
        let left = create(&mut store, "left");
        let right = create(&mut store, "right");
        let bottom = create(&mut store, "bottom");
        link(&mut store, &top.id, &left.id, DependencyType::Blocks);
        link(&mut store, &top.id, &right.id, DependencyType::Blocks);
        link(&mut store, &left.id, &bottom.id, DependencyType::Blocks);
        link(&mut store, &right.id, &bottom.id, DependencyType::Blocks);

        let tree = store.get_dependency_tree(&top.id, 10, false).unwrap();
        assert_eq!(tree.iter().filter(|n| n.issue.id == bottom.id).count(), 1);

        let tree = store.get_dependency_tree(&top.id, 10, true).unwrap();
        assert_eq!(tree.iter().filter(|n| n.issue.id == bottom.id).count(), 2);
    }
}
