//! `bd daemon` - daemon lifecycle and health.

use crate::cli::context::AppContext;
use crate::cli::{Cli, DaemonCommands};
use crate::config;
use crate::daemon::{self, client::DaemonClient, lock};
use crate::error::Result;
use serde_json::json;

/// Exit code for "daemon reported unhealthy".
pub const EXIT_UNHEALTHY: i32 = 2;

pub fn execute(command: &DaemonCommands, cli: &Cli) -> Result<()> {
    match command {
        DaemonCommands::Run => {
            let cwd = std::env::current_dir()?;
            let paths = config::resolve_paths(&cwd, cli.db.as_deref())?;
            let actor = cli.actor.clone().unwrap_or_else(config::resolve_actor);
            daemon::run(paths, actor)
        }
        DaemonCommands::Status => {
            let ctx = AppContext::open(cli)?;
            if lock::is_daemon_running(&ctx.paths.beads_dir) {
                println!("Daemon is running.");
            } else {
                println!("No daemon running for this workspace.");
            }
            Ok(())
        }
        DaemonCommands::Health => {
            let ctx = AppContext::open(cli)?;
            match DaemonClient::connect(&ctx.paths) {
                Some(mut daemon) => match daemon.call("health", json!({})) {
                    Ok(data) if data["healthy"] == true => {
                        println!("Daemon healthy ({} issues).", data["issues"]);
                        Ok(())
                    }
                    Ok(_) | Err(_) => {
                        eprintln!("Daemon reported unhealthy.");
                        std::process::exit(EXIT_UNHEALTHY);
                    }
                },
                None => {
                    println!("No daemon running; direct mode is healthy by definition.");
                    Ok(())
                }
            }
        }
    }
}
