//! Single-instance daemon lock.
//!
//! An OS advisory exclusive lock on `.beads/daemon.lock` guarantees one
//! daemon per workspace. A companion `daemon.pid` file is kept for
//! platforms and tools that cannot read a locked file; when the lock file
//! is missing entirely, liveness falls back to probing the PID from it.

use crate::error::{BeadsError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Held for the daemon's lifetime; releasing the lock and removing the pid
/// file happens on drop.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    pid_path: PathBuf,
}

/// Acquire the workspace daemon lock.
///
/// Opens (or creates) `daemon.lock`, takes a non-blocking exclusive lock,
/// truncates, writes our PID, syncs, and mirrors the PID into `daemon.pid`.
///
/// # Errors
///
/// Returns `DaemonLocked` when another process holds the lock, `Io` for
/// filesystem failures.
pub fn acquire(beads_dir: &Path) -> Result<DaemonLock> {
    let lock_path = beads_dir.join("daemon.lock");
    let pid_path = beads_dir.join("daemon.pid");

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;

    if file.try_lock_exclusive().is_err() {
        return Err(BeadsError::DaemonLocked { path: lock_path });
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    fs::write(&pid_path, format!("{}\n", std::process::id()))?;

    Ok(DaemonLock { file, pid_path })
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.pid_path);
    }
}

/// Is a daemon already running for this workspace?
///
/// Tries the lock first: failing to acquire means a daemon holds it. When
/// the lock file does not exist, falls back to checking whether the PID in
/// `daemon.pid` names a live process (older daemons only wrote the pid
/// file).
#[must_use]
pub fn is_daemon_running(beads_dir: &Path) -> bool {
    let lock_path = beads_dir.join("daemon.lock");

    if lock_path.exists() {
        let Ok(file) = OpenOptions::new().read(true).write(true).open(&lock_path) else {
            return false;
        };
        if file.try_lock_exclusive().is_err() {
            return true;
        }
        let _ = fs2::FileExt::unlock(&file);
        return false;
    }

    read_pid(&beads_dir.join("daemon.pid")).is_some_and(pid_is_alive)
}

fn read_pid(pid_path: &Path) -> Option<i32> {
    let mut contents = String::new();
    File::open(pid_path)
        .ok()?
        .read_to_string(&mut contents)
        .ok()?;
    contents.lines().next()?.trim().parse().ok()
}

#[cfg(unix)]
fn pid_is_alive(pid: i32) -> bool {
    // Signal 0: existence probe only.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: i32) -> bool {
    false
}
