//! Command-line surface. Thin shell over the core: argument parsing here,
//! semantics in `storage`/`sync`/`daemon`.

pub mod commands;
pub mod context;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bd", about = "Git-native issue tracker", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose diagnostics on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Bypass the daemon and open the store in-process
    /// (`BEADS_NO_DAEMON` does the same)
    #[arg(long, global = true)]
    pub no_daemon: bool,

    /// Skip the auto-flush after mutating commands
    #[arg(long, global = true)]
    pub no_auto_flush: bool,

    /// Explicit database path
    #[arg(long, global = true, env = "BEADS_DB")]
    pub db: Option<PathBuf>,

    /// Actor recorded in audit events
    #[arg(long, global = true, env = "BD_ACTOR")]
    pub actor: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a beads workspace in the current directory
    Init(InitArgs),
    /// Create an issue
    Create(CreateArgs),
    /// Update issue fields
    Update(UpdateArgs),
    /// Close an issue
    Close(CloseArgs),
    /// Delete issues (hard delete with cascade accounting)
    Delete(DeleteArgs),
    /// Show one issue with relations and history
    Show(ShowArgs),
    /// List issues
    List(ListArgs),
    /// Substring search over titles, descriptions, and notes
    Search(SearchArgs),
    /// Issues with no open blocking predecessor
    Ready(ReadyArgs),
    /// Issues blocked by open predecessors
    Blocked,
    /// Manage dependencies
    Dep {
        #[command(subcommand)]
        command: DepCommands,
    },
    /// Manage comments
    Comment {
        #[command(subcommand)]
        command: CommentCommands,
    },
    /// Manage labels
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },
    /// Epic status rollup
    Epic {
        #[command(subcommand)]
        command: EpicCommands,
    },
    /// Import/export between the store and the JSONL
    Sync(SyncArgs),
    /// Workspace statistics
    Stats,
    /// Workspace diagnostics
    Doctor,
    /// Workspace configuration key/value store
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Rename the issue prefix, rewriting every ID and reference
    RenamePrefix(RenamePrefixArgs),
    /// Daemon lifecycle
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Issue ID prefix (lowercase, letter-led, at most 8 chars)
    pub prefix: String,

    /// Reinitialize over an existing workspace
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Issue title
    pub title: String,

    #[arg(short, long)]
    pub description: Option<String>,

    /// 0 (critical) through 4 (backlog)
    #[arg(short, long)]
    pub priority: Option<String>,

    /// bug | feature | task | epic | chore
    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    #[arg(short, long)]
    pub assignee: Option<String>,

    /// Repeatable label
    #[arg(short, long)]
    pub label: Vec<String>,

    /// Explicit ID (consumes that number from the counter)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Issue ID
    pub id: String,

    /// field=value pairs (title, description, design, acceptance_criteria,
    /// notes, status, priority, type, assignee, external_ref, source_repo)
    #[arg(required = true)]
    pub fields: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CloseArgs {
    pub ids: Vec<String>,

    #[arg(short, long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub ids: Vec<String>,

    /// Also delete transitive dependents
    #[arg(long)]
    pub cascade: bool,

    /// Delete even when dependents would be orphaned
    #[arg(long)]
    pub force: bool,

    /// Report what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,

    /// Include the audit event history
    #[arg(long)]
    pub events: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// open | in_progress | blocked | closed
    #[arg(short, long)]
    pub status: Option<String>,

    #[arg(short, long)]
    pub assignee: Option<String>,

    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    #[arg(short, long)]
    pub label: Option<String>,

    #[arg(long)]
    pub closed: bool,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub query: String,

    #[arg(long)]
    pub closed: bool,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
    List,
}

#[derive(Args, Debug)]
pub struct RenamePrefixArgs {
    /// Current prefix (e.g. `bd`)
    pub old_prefix: String,
    /// Replacement prefix (lowercase, letter-led, at most 8 chars)
    pub new_prefix: String,
}

#[derive(Args, Debug)]
pub struct ReadyArgs {
    /// hybrid | priority | oldest
    #[arg(long, default_value = "hybrid")]
    pub sort: String,

    #[arg(short, long)]
    pub assignee: Option<String>,

    #[arg(short, long)]
    pub priority: Option<String>,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Add an edge: ISSUE depends on TARGET
    Add {
        issue_id: String,
        depends_on_id: String,
        /// blocks | parent-child | related | discovered-from
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: String,
    },
    /// Remove an edge
    Remove {
        issue_id: String,
        depends_on_id: String,
    },
    /// Dependency tree from an issue
    Tree {
        id: String,
        #[arg(long, default_value_t = 10)]
        max_depth: usize,
        /// Show every path through diamonds
        #[arg(long)]
        all_paths: bool,
    },
    /// Detect cycles through blocking edges
    Cycles,
}

#[derive(Subcommand, Debug)]
pub enum CommentCommands {
    Add {
        id: String,
        text: String,
        #[arg(long)]
        author: Option<String>,
    },
    List {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum LabelCommands {
    Add { id: String, label: String },
    Remove { id: String, label: String },
    List { id: String },
}

#[derive(Subcommand, Debug)]
pub enum EpicCommands {
    /// Child completion rollup for an epic
    Status { id: String },
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Export dirty issues now (manual flush; resets failure backoff)
    #[arg(long)]
    pub flush: bool,

    /// Rewrite the whole JSONL instead of an incremental export
    #[arg(long)]
    pub full: bool,

    /// Import the JSONL now
    #[arg(long)]
    pub import: bool,

    /// Capture the pre-pull snapshot (run before `git pull`)
    #[arg(long)]
    pub pull_start: bool,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground
    Run,
    /// Is a daemon running for this workspace?
    Status,
    /// Query a running daemon's health (exit 2 when unhealthy)
    Health,
}
