//! Persistent storage: SQLite mirror of the JSONL source of truth.

pub mod graph;
pub mod schema;
mod sqlite;

pub use graph::{ReadyFilters, SortPolicy, TreeNode};
pub use sqlite::{
    DeleteResult, IssueUpdate, ListFilters, MutationContext, SqliteStorage, META_BD_VERSION,
    META_ISSUE_PREFIX,
};
