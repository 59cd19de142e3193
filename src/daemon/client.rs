//! Blocking RPC client used by CLI invocations.
//!
//! A command first tries the workspace daemon's socket; with
//! `BEADS_PREFER_GLOBAL_DAEMON` set it then tries the per-user daemon.
//! Any connection failure, protocol failure, or `unknown operation` answer
//! means the caller falls back to direct mode (opening the store
//! in-process); the daemon is an optimization, never a requirement.

use crate::config::{self, WorkspacePaths};
use crate::daemon::protocol::{
    decode, read_frame_blocking, write_frame_blocking, Request, Response, UNKNOWN_OPERATION,
};
use crate::error::{BeadsError, Result};
use serde_json::Value;
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Connected client; one stream, sequential calls.
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Try to connect to a daemon for this workspace.
    ///
    /// Returns `None` when direct mode is forced (`BEADS_NO_DAEMON`) or no
    /// daemon is reachable.
    #[must_use]
    pub fn connect(paths: &WorkspacePaths) -> Option<Self> {
        if config::no_daemon() {
            return None;
        }

        if let Some(client) = Self::connect_socket(&paths.socket_path()) {
            return Some(client);
        }

        if config::prefer_global_daemon() {
            if let Some(global_dir) = config::global_beads_dir() {
                return Self::connect_socket(&global_dir.join("bd.sock"));
            }
        }

        None
    }

    fn connect_socket(path: &std::path::Path) -> Option<Self> {
        let stream = UnixStream::connect(path).ok()?;
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .ok()?;
        stream
            .set_write_timeout(Some(Duration::from_secs(30)))
            .ok()?;
        Some(Self { stream })
    }

    /// One request/response round trip.
    ///
    /// # Errors
    ///
    /// Returns `Daemon` with the server's error string (exactly
    /// `unknown operation` for unroutable ops, see
    /// [`is_unknown_operation`]), or `Io` on stream failure.
    pub fn call(&mut self, op: &str, args: Value) -> Result<Value> {
        let request = Request {
            op: op.to_string(),
            args,
        };
        write_frame_blocking(&mut self.stream, &request)?;
        let payload = read_frame_blocking(&mut self.stream)?;
        let response: Response = decode(&payload)?;

        if response.success {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(BeadsError::Daemon(
                response.error.unwrap_or_else(|| "unspecified".to_string()),
            ))
        }
    }
}

/// Did the daemon answer `unknown operation`? The caller should fall back
/// to direct mode rather than surface this to the user.
#[must_use]
pub fn is_unknown_operation(err: &BeadsError) -> bool {
    matches!(err, BeadsError::Daemon(message) if message == UNKNOWN_OPERATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_operation_detection() {
        assert!(is_unknown_operation(&BeadsError::Daemon(
            "unknown operation".to_string()
        )));
        assert!(!is_unknown_operation(&BeadsError::Daemon(
            "something else".to_string()
        )));
        assert!(!is_unknown_operation(&BeadsError::NotInitialized));
    }

    #[test]
    fn connect_fails_cleanly_without_daemon() {
        let temp = tempfile::TempDir::new().unwrap();
        let beads_dir = temp.path().join(".beads");
        std::fs::create_dir_all(&beads_dir).unwrap();
        let paths = WorkspacePaths {
            db_path: beads_dir.join("issues.db"),
            jsonl_path: beads_dir.join("issues.jsonl"),
            beads_dir,
        };
        assert!(DaemonClient::connect(&paths).is_none());
    }
}
