//! Filesystem watcher bridged into the daemon event loop.
//!
//! Watches the `.beads` directory (a direct watch on the JSONL breaks when
//! Git replaces it by rename) and `.git/refs/heads` so branch switches
//! trigger an import. `notify` delivers events on its own thread; they are
//! forwarded over an unbounded channel into the tokio loop.

use crate::config::WorkspacePaths;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Event classes the daemon loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The JSONL was written or created.
    JsonlChanged,
    /// The JSONL was removed or renamed away (e.g. a Git checkout); the
    /// loop re-triggers an import after a short delay.
    JsonlReplaced,
    /// Something under `.git/refs/heads` changed: a branch moved.
    RefsChanged,
}

/// Running watcher; dropping it stops event delivery.
pub struct WorkspaceWatcher {
    // Held for its Drop side effect.
    _watcher: RecommendedWatcher,
}

/// Start watching. Returns the watcher handle and the event receiver, or
/// `None` when the platform watcher cannot be created (the caller then
/// falls back to polling).
#[must_use]
pub fn start(paths: &WorkspacePaths) -> Option<(WorkspaceWatcher, mpsc::UnboundedReceiver<WatchEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let jsonl_path = paths.jsonl_path.clone();
    let refs_dir = refs_heads_dir(paths);
    let refs_dir_for_handler = refs_dir.clone();

    let mut watcher = match notify::recommended_watcher(move |result: notify::Result<Event>| {
        let Ok(event) = result else { return };
        if let Some(classified) = classify(&event, &jsonl_path, refs_dir_for_handler.as_deref()) {
            let _ = tx.send(classified);
        }
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!("native file watcher unavailable: {e}");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&paths.beads_dir, RecursiveMode::NonRecursive) {
        tracing::warn!(
            dir = %paths.beads_dir.display(),
            "cannot watch workspace directory: {e}"
        );
        return None;
    }

    if let Some(refs) = &refs_dir {
        if refs.is_dir() {
            if let Err(e) = watcher.watch(refs, RecursiveMode::Recursive) {
                tracing::debug!("cannot watch git refs: {e}");
            }
        }
    }

    Some((WorkspaceWatcher { _watcher: watcher }, rx))
}

fn refs_heads_dir(paths: &WorkspacePaths) -> Option<PathBuf> {
    let workspace_root = paths.beads_dir.parent()?;
    let refs = workspace_root.join(".git").join("refs").join("heads");
    Some(refs)
}

fn classify(
    event: &Event,
    jsonl_path: &std::path::Path,
    refs_dir: Option<&std::path::Path>,
) -> Option<WatchEvent> {
    let touches_jsonl = event
        .paths
        .iter()
        .any(|p| p.file_name() == jsonl_path.file_name());
    let touches_refs = refs_dir
        .is_some_and(|refs| event.paths.iter().any(|p| p.starts_with(refs)));

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) if touches_jsonl => {
            Some(WatchEvent::JsonlChanged)
        }
        EventKind::Remove(_) if touches_jsonl => Some(WatchEvent::JsonlReplaced),
        _ if touches_refs => Some(WatchEvent::RefsChanged),
        _ => None,
    }
}
