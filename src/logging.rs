//! Logging initialization built on `tracing-subscriber`.
//!
//! Diagnostics go to stderr so stdout stays clean for command output and
//! `--json` consumers. `BD_DEBUG=1` raises the default level to debug;
//! `RUST_LOG` overrides everything.

use crate::error::Result;
use std::env;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber once, at process start.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose || env_debug() {
        "beads=debug"
    } else {
        "beads=warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn env_debug() -> bool {
    match env::var("BD_DEBUG") {
        Ok(v) => !matches!(v.as_str(), "" | "0" | "false"),
        Err(_) => false,
    }
}
