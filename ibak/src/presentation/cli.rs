use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "ibak: browse and export device backups", long_about = None)]
pub struct Cli {
    /// Log verbosity; `IBAK_LOG` takes precedence when set
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Filter by domain
    #[arg(long, value_name = "STRING")]
    pub domain: Option<String>,

    /// Filter by namespace (usually an app bundle id)
    #[arg(long, value_name = "STRING")]
    pub namespace: Option<String>,

    /// Filter by device path
    #[arg(long, value_name = "STRING")]
    pub path: Option<String>,

    /// Interpret filters as SQLite LIKE expressions instead of prefixes
    #[arg(long)]
    pub like_syntax: bool,
}

#[derive(Subcommand)]
pub enum InspectCommands {
    /// Show device and backup info
    Info { backup: PathBuf },

    /// List installed apps
    Apps { backup: PathBuf },

    /// List backup domains
    Domains { backup: PathBuf },

    /// List namespaces of a domain
    Namespaces {
        /// One of the names printed by `inspect domains`
        domain: String,
        backup: PathBuf,
    },

    /// List backup files
    Files {
        backup: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Print large listings without asking
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export files from a backup into a directory tree
    Export {
        backup: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Skip records whose content is missing instead of failing
        #[arg(long)]
        ignore_missing: bool,

        /// Restore modified dates
        #[arg(long)]
        restore_dates: bool,

        /// Restore symbolic links
        #[arg(long)]
        restore_symlinks: bool,

        /// Copy this many files concurrently
        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,

        /// Print the export report as JSON
        #[arg(long)]
        json: bool,
    },

    #[command(subcommand)]
    /// Inspect a backup
    Inspect(InspectCommands),

    /// Copy one content file out by identity or by domain and path.
    /// Does not read the catalog, so it also works on damaged backups.
    Get {
        backup: PathBuf,
        out: PathBuf,

        /// File identity (40 hex characters)
        #[arg(long, required_unless_present = "domain", conflicts_with = "domain")]
        id: Option<String>,

        /// Raw domain, including the namespace (e.g. `AppDomain-com.example`)
        #[arg(long, requires = "path")]
        domain: Option<String>,

        #[arg(long, requires = "domain")]
        path: Option<String>,
    },
}
