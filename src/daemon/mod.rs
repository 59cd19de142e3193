//! Daemon core: single-instance lifecycle, event-driven sync loop,
//! mutation-aware debouncing, and RPC serving.
//!
//! One daemon per workspace amortizes database opening, watches the JSONL
//! and Git refs, and serves CLI clients over a Unix socket. The event loop
//! is a single task; imports and flushes never interleave their critical
//! sections. Everything else (RPC connections, the watcher thread, the
//! debouncer tasks) feeds it through channels.

pub mod client;
pub mod debounce;
pub mod lock;
pub mod protocol;
pub mod server;
pub mod watcher;

use crate::config::{self, WorkspacePaths, DAEMON_DEBOUNCE};
use crate::error::Result;
use crate::storage::SqliteStorage;
use crate::sync::{self, flush::FlushState, ImportOutcome};
use debounce::Debouncer;
use server::RpcServer;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch as watch_channel};
use tokio::time::interval;

/// Mutable daemon state behind one mutex: the open store, workspace paths,
/// actor attribution, and flush scheduling. Lock order when several are
/// involved: core (store) first, never while holding a debouncer handle.
pub struct DaemonCore {
    pub storage: SqliteStorage,
    pub paths: WorkspacePaths,
    pub actor: String,
    pub flush: FlushState,
}

pub type SharedCore = Arc<Mutex<DaemonCore>>;

/// Bound on the mutation event stream; a burst beyond this drops events,
/// which the safety-net ticker repairs.
pub const MUTATION_CHANNEL_CAPACITY: usize = 256;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const SAFETY_NET_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fire {
    Import,
    Export,
}

/// Run the daemon until SIGINT/SIGTERM. Blocking; builds its own runtime.
///
/// # Errors
///
/// Returns `DaemonLocked` when another daemon owns the workspace, or any
/// startup failure (store open, socket bind).
pub fn run(paths: WorkspacePaths, actor: String) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_inner(paths, actor))
}

#[allow(clippy::too_many_lines)]
async fn run_inner(paths: WorkspacePaths, actor: String) -> Result<()> {
    let daemon_lock = lock::acquire(&paths.beads_dir)?;
    tracing::info!(workspace = %paths.beads_dir.display(), "daemon starting");

    let storage = SqliteStorage::open(&paths.db_path)?;
    let core: SharedCore = Arc::new(Mutex::new(DaemonCore {
        storage,
        paths: paths.clone(),
        actor,
        flush: FlushState::new(),
    }));

    let listener = server::bind_socket(&paths.socket_path())?;
    let (shutdown_tx, shutdown_rx) = watch_channel::channel(false);
    let (rpc, mut mutation_rx) = RpcServer::new(Arc::clone(&core), MUTATION_CHANNEL_CAPACITY);
    let server_task = tokio::spawn(Arc::clone(&rpc).serve(listener, shutdown_rx));

    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let import_debouncer = Debouncer::spawn(DAEMON_DEBOUNCE, fired_tx.clone(), Fire::Import);
    let export_debouncer = Debouncer::spawn(
        config::flush_debounce_or(DAEMON_DEBOUNCE),
        fired_tx,
        Fire::Export,
    );

    // Native watcher, or a polling ticker when unavailable.
    let (_watch_keepalive, mut watch_rx, _watcher_handle, have_watcher) =
        match watcher::start(&paths) {
            Some((handle, rx)) => (None, rx, Some(handle), true),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), rx, None, false)
            }
        };
    let polling = !have_watcher && config::watcher_fallback_enabled();
    if polling {
        tracing::warn!("native watcher unavailable; falling back to polling");
    }

    // Catch up with whatever landed while no daemon was running.
    run_import(&core, &export_debouncer);

    let mut health_ticker = interval(HEALTH_CHECK_INTERVAL);
    let mut safety_ticker = interval(SAFETY_NET_INTERVAL);
    let mut poll_ticker = interval(POLL_INTERVAL);
    let mut poll_state = PollState::capture(&paths);

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tracing::info!("daemon ready");

    loop {
        tokio::select! {
            event = watch_rx.recv() => {
                match event {
                    Some(watcher::WatchEvent::JsonlChanged | watcher::WatchEvent::RefsChanged) => {
                        import_debouncer.trigger();
                    }
                    Some(watcher::WatchEvent::JsonlReplaced) => {
                        // Checkout replaced the file; the debounce interval
                        // doubles as the re-watch settling delay.
                        import_debouncer.trigger();
                    }
                    None => {}
                }
            }
            event = mutation_rx.recv() => {
                if let Some(event) = event {
                    tracing::debug!(op = %event.event_type, id = %event.issue_id, "mutation");
                    lock_core(&core).flush.mark_dirty_and_schedule_flush();
                    export_debouncer.trigger();
                }
            }
            fired = fired_rx.recv() => match fired {
                Some(Fire::Import) => run_import(&core, &export_debouncer),
                Some(Fire::Export) => run_flush(&core),
                None => {}
            },
            _ = health_ticker.tick() => {
                let core = lock_core(&core);
                if let Err(e) = core.storage.count_issues() {
                    tracing::error!("health check failed: {e}");
                }
            }
            _ = safety_ticker.tick() => {
                // Dropped mutation events mean exports may be owed.
                if rpc.reset_dropped_events_count() > 0 {
                    lock_core(&core).flush.mark_dirty_and_schedule_flush();
                    export_debouncer.trigger();
                }
            }
            _ = poll_ticker.tick(), if polling => {
                let current = PollState::capture(&paths);
                if current != poll_state {
                    poll_state = current;
                    import_debouncer.trigger();
                }
            }
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
        }
    }

    tracing::info!("daemon shutting down");

    // No committed change may be lost: cancel pending timers and flush
    // synchronously before releasing anything.
    import_debouncer.cancel();
    export_debouncer.cancel();
    {
        let mut core = lock_core(&core);
        core.flush.mark_dirty_and_schedule_flush();
        let DaemonCore {
            storage,
            paths,
            flush,
            ..
        } = &mut *core;
        if let Err(e) = flush.run(storage, paths) {
            tracing::error!("final flush failed, dirty state preserved: {e}");
        }
    }

    let _ = shutdown_tx.send(true);
    server_task.abort();
    let _ = std::fs::remove_file(paths.socket_path());
    drop(daemon_lock);

    Ok(())
}

/// Run the debounced import, scheduling whatever export it calls for.
fn run_import(core: &SharedCore, export_debouncer: &Debouncer) {
    let mut guard = lock_core(core);
    let DaemonCore {
        storage,
        paths,
        actor,
        flush,
    } = &mut *guard;

    match sync::auto_import(storage, paths, actor) {
        Ok(ImportOutcome::Imported(result)) => {
            if result.needs_full_export() {
                flush.mark_dirty_and_schedule_full_export();
            } else if result.needs_flush() {
                flush.mark_dirty_and_schedule_flush();
            } else {
                return;
            }
            export_debouncer.trigger();
        }
        Ok(ImportOutcome::NoFile | ImportOutcome::Unchanged) => {}
        Err(e) => tracing::error!("auto-import failed: {e}"),
    }
}

/// Run the debounced flush; failures keep state dirty and are logged by
/// the flush layer.
fn run_flush(core: &SharedCore) {
    let mut guard = lock_core(core);
    let DaemonCore {
        storage,
        paths,
        flush,
        ..
    } = &mut *guard;
    let _ = flush.run(storage, paths);
}

fn lock_core(core: &SharedCore) -> MutexGuard<'_, DaemonCore> {
    match core.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cheap change detector for the polling fallback.
#[derive(Debug, PartialEq, Eq)]
struct PollState {
    mtime: Option<std::time::SystemTime>,
    len: Option<u64>,
}

impl PollState {
    fn capture(paths: &WorkspacePaths) -> Self {
        let metadata = std::fs::metadata(&paths.jsonl_path).ok();
        Self {
            mtime: metadata.as_ref().and_then(|m| m.modified().ok()),
            len: metadata.as_ref().map(std::fs::Metadata::len),
        }
    }
}
