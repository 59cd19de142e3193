//! Error types for `beads`.
//!
//! # Design
//!
//! - `thiserror` derive for the structured variants the core reports
//! - `anyhow` integration for the CLI shell
//! - Exit-code conventions: 0 success, 1 user-visible error; warnings
//!   never change the exit code

use std::path::PathBuf;
use thiserror::Error;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BeadsError>;

/// Primary error type for `beads` operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Storage ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// `SQLite` error, wrapped so callers can treat all storage failures alike.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    // === Issues ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Issue ID does not have the `<prefix>-<number>` shape.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    /// ID prefix failed validation (lowercase, letter-led, at most 8 chars).
    #[error("Invalid issue prefix: {prefix}")]
    InvalidPrefix { prefix: String },

    /// An update referenced a field that does not exist on issues.
    #[error("Invalid field: {field}")]
    InvalidField { field: String },

    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Invalid issue type value.
    #[error("Invalid issue type: {issue_type}")]
    InvalidType { issue_type: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    // === Dependencies ===
    /// Adding the dependency would close a cycle through blocking edges.
    #[error("Cycle detected in dependencies: {path}")]
    DependencyCycle { path: String },

    /// Parent-child edges are directed child -> parent.
    #[error("Invalid parent-child direction: {child} must depend on {parent}")]
    InvalidParentChild { child: String, parent: String },

    /// Self-referential dependency.
    #[error("Issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    /// Duplicate dependency.
    #[error("Dependency already exists: {from} -> {to}")]
    DuplicateDependency { from: String, to: String },

    // === Sync ===
    /// The JSONL contains unresolved Git merge-conflict markers.
    #[error("Merge conflict in {path}: {detail}")]
    MergeConflict { path: PathBuf, detail: String },

    /// A three-way merge found issues deleted remotely but modified locally.
    #[error("Deletion conflict: {ids:?} were deleted remotely but modified locally")]
    DeletionConflict { ids: Vec<String> },

    /// Failed to parse a line in a JSONL file.
    #[error("Parse error in {path} at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    // === Daemon ===
    /// Another daemon already holds the workspace lock.
    #[error("Daemon already running (lock held): {path}")]
    DaemonLocked { path: PathBuf },

    /// The daemon answered an RPC with a protocol-level error.
    #[error("Daemon error: {0}")]
    Daemon(String),

    // === Workspace ===
    /// Beads workspace not initialized.
    #[error("Beads not initialized: run 'bd init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    /// A `.beads` directory nested inside another `.beads` directory.
    #[error("Nested beads workspace at '{path}'")]
    NestedWorkspace { path: PathBuf },

    // === I/O ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapped anyhow error from the CLI shell.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeadsError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::NotInitialized
                | Self::IssueNotFound { .. }
                | Self::Validation { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidType { .. }
                | Self::InvalidPriority { .. }
                | Self::InvalidField { .. }
                | Self::InvalidId { .. }
                | Self::InvalidPrefix { .. }
                | Self::MergeConflict { .. }
                | Self::DeletionConflict { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: bd init"),
            Self::DatabaseNotFound { .. } => Some("Check the path or run: bd init"),
            Self::DependencyCycle { .. } => Some("Remove one dependency to break the cycle"),
            Self::SelfDependency { .. } => Some("An issue cannot depend on itself"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (critical) and 4 (backlog)")
            }
            Self::InvalidStatus { .. } => Some("Valid statuses: open, in_progress, blocked, closed"),
            Self::InvalidType { .. } => Some("Valid types: bug, feature, task, epic, chore"),
            Self::MergeConflict { .. } => {
                Some("Resolve the conflict markers in the JSONL, then re-run")
            }
            Self::DeletionConflict { .. } => {
                Some("Re-apply or drop the local edits, then re-run the import")
            }
            Self::DaemonLocked { .. } => Some("A daemon is already running for this workspace"),
            _ => None,
        }
    }

    /// Exit code reported by the CLI for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
