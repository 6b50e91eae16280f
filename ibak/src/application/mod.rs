pub mod handlers;

use crate::presentation::cli::{Cli, Commands, InspectCommands, LogLevel};
use clap::Parser;
use ibak_core::error::Result;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter; wins over `--log-level`.
const LOG_ENV: &str = "IBAK_LOG";

fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.directive()));
    // Logs go to stderr; stdout carries listings and reports.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    match cli.command {
        Commands::Export {
            backup,
            output,
            filter,
            ignore_missing,
            restore_dates,
            restore_symlinks,
            workers,
            no_progress,
            json,
        } => handlers::handle_export(
            backup,
            output,
            filter,
            ignore_missing,
            restore_dates,
            restore_symlinks,
            workers,
            no_progress,
            json,
        ),
        Commands::Inspect(cmd) => match cmd {
            InspectCommands::Info { backup } => handlers::handle_inspect_info(backup),
            InspectCommands::Apps { backup } => handlers::handle_inspect_apps(backup),
            InspectCommands::Domains { backup } => handlers::handle_inspect_domains(backup),
            InspectCommands::Namespaces { domain, backup } => {
                handlers::handle_inspect_namespaces(domain, backup)
            }
            InspectCommands::Files {
                backup,
                filter,
                yes,
            } => handlers::handle_inspect_files(backup, filter, yes),
        },
        Commands::Get {
            backup,
            out,
            id,
            domain,
            path,
        } => handlers::handle_get(backup, out, id, domain, path),
    }
}
