//! Content hashing for issue reconciliation and export elision.
//!
//! Uses SHA256 over stable ordered fields with null separators. Timestamps
//! (`created_at`, `updated_at`, `closed_at`, `compacted_at`) are excluded so
//! that a timestamp-only round-trip produces an identical hash.

use sha2::{Digest, Sha256};

use crate::model::Issue;

/// Compute the SHA256 content hash for an issue.
///
/// Fields included (stable order with null separators): title, description,
/// design, `acceptance_criteria`, notes, status, priority, `issue_type`,
/// assignee, `close_reason`, `external_ref`, `source_repo`,
/// `compaction_level`, labels (sorted), dependencies (sorted), comments.
///
/// Fields excluded: id (rewritten by collision remap) and all timestamps.
#[must_use]
pub fn content_hash(issue: &Issue) -> String {
    let mut hasher = Sha256::new();

    let mut add_field = |value: &str| {
        if value.contains('\0') {
            hasher.update(value.replace('\0', " ").as_bytes());
        } else {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\x00");
    };

    add_field(&issue.title);
    add_field(issue.description.as_deref().unwrap_or(""));
    add_field(issue.design.as_deref().unwrap_or(""));
    add_field(issue.acceptance_criteria.as_deref().unwrap_or(""));
    add_field(issue.notes.as_deref().unwrap_or(""));
    add_field(issue.status.as_str());
    add_field(&format!("P{}", issue.priority.0));
    add_field(issue.issue_type.as_str());
    add_field(issue.assignee.as_deref().unwrap_or(""));
    add_field(issue.close_reason.as_deref().unwrap_or(""));
    add_field(issue.external_ref.as_deref().unwrap_or(""));
    add_field(issue.source_repo.as_deref().unwrap_or(""));
    add_field(&issue.compaction_level.map_or(String::new(), |l| l.to_string()));

    let mut labels = issue.labels.clone();
    labels.sort();
    for label in &labels {
        add_field(label);
    }

    let mut deps: Vec<String> = issue
        .dependencies
        .iter()
        .map(|d| format!("{}>{}:{}", d.issue_id, d.depends_on_id, d.dep_type))
        .collect();
    deps.sort();
    for dep in &deps {
        add_field(dep);
    }

    for comment in &issue.comments {
        add_field(&format!("{}\x1f{}", comment.author, comment.body));
    }

    format!("{:x}", hasher.finalize())
}

/// SHA256 of arbitrary bytes, lowercase hex. Used for the import hash gate.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DependencyType};
    use chrono::{Duration, Utc};

    #[test]
    fn content_hash_deterministic_and_hex() {
        let issue = Issue::new("bd-1", "Test Issue");
        let hash = content_hash(&issue);
        assert_eq!(hash, content_hash(&issue));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_ignores_timestamps() {
        let mut issue = Issue::new("bd-1", "Test Issue");
        let hash1 = content_hash(&issue);

        issue.updated_at = issue.updated_at + Duration::seconds(90);
        issue.created_at = Utc::now();
        let hash2 = content_hash(&issue);

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn content_hash_ignores_id() {
        let a = Issue::new("bd-1", "Same");
        let mut b = Issue::new("bd-2", "Same");
        b.created_at = a.created_at;
        b.updated_at = a.updated_at;
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn content_hash_changes_with_dependencies() {
        let mut issue = Issue::new("bd-1", "Test Issue");
        let hash1 = content_hash(&issue);

        issue.dependencies.push(Dependency {
            issue_id: "bd-1".to_string(),
            depends_on_id: "bd-2".to_string(),
            dep_type: DependencyType::Blocks,
        });
        assert_ne!(hash1, content_hash(&issue));
    }

    #[test]
    fn label_order_does_not_matter() {
        let mut a = Issue::new("bd-1", "T");
        let mut b = a.clone();
        a.labels = vec!["x".to_string(), "y".to_string()];
        b.labels = vec!["y".to_string(), "x".to_string()];
        assert_eq!(content_hash(&a), content_hash(&b));
    }
}
