use beads::cli::commands;
use beads::cli::context::AppContext;
use beads::cli::{Cli, Commands};
use beads::logging::init_logging;
use beads::BeadsError;
use clap::Parser;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Err(e) = run(&cli) {
        handle_error(&e, cli.json);
    }
}

fn run(cli: &Cli) -> Result<(), BeadsError> {
    // Init and the daemon manage their own lifecycle; everything else runs
    // inside a context that imports on entry and flushes on exit.
    match &cli.command {
        Commands::Init(args) => return commands::init::execute(args),
        Commands::Daemon { command } => return commands::daemon_cmd::execute(command, cli),
        _ => {}
    }

    let mut ctx = AppContext::open(cli)?;
    let result = dispatch(cli, &mut ctx);
    // Flush even when the command failed: mutations that committed before
    // the error still belong in the JSONL.
    ctx.finish();
    result
}

fn dispatch(cli: &Cli, ctx: &mut AppContext) -> Result<(), BeadsError> {
    match &cli.command {
        Commands::Init(_) | Commands::Daemon { .. } => unreachable!("handled in run"),
        Commands::Create(args) => commands::create::execute(args, ctx),
        Commands::Update(args) => commands::update::execute(args, ctx),
        Commands::Close(args) => commands::close::execute(args, ctx),
        Commands::Delete(args) => commands::delete::execute(args, ctx),
        Commands::Show(args) => commands::show::execute(args, ctx),
        Commands::List(args) => commands::list::execute(args, ctx),
        Commands::Search(args) => commands::search::execute(args, ctx),
        Commands::Ready(args) => commands::ready::execute(args, ctx),
        Commands::Blocked => commands::blocked::execute(ctx),
        Commands::Dep { command } => commands::dep::execute(command, ctx),
        Commands::Comment { command } => commands::comment::execute(command, ctx),
        Commands::Label { command } => commands::label::execute(command, ctx),
        Commands::Epic { command } => commands::epic::execute(command, ctx),
        Commands::Sync(args) => commands::sync_cmd::execute(args, ctx),
        Commands::Stats => commands::stats::execute(ctx),
        Commands::Doctor => commands::doctor::execute(ctx),
        Commands::Config { command } => commands::config_cmd::execute(command, ctx),
        Commands::RenamePrefix(args) => commands::rename_prefix::execute(args, ctx),
    }
}

fn handle_error(error: &BeadsError, json: bool) {
    if json {
        let payload = serde_json::json!({
            "error": error.to_string(),
            "suggestion": error.suggestion(),
        });
        eprintln!("{payload}");
    } else {
        eprintln!("error: {error}");
        if let Some(suggestion) = error.suggestion() {
            eprintln!("hint: {suggestion}");
        }
    }
    std::process::exit(error.exit_code());
}
