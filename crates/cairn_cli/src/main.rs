//! Cairn CLI: fingerprint computation plans and inspect the artifact cache.
//!
//! Provides `cairn fingerprint` for printing the fingerprints of a plan file's
//! roots, and `cairn cache` for listing, summarizing and pruning the
//! configured cache directory.

#![warn(missing_docs)]

mod cache;
mod fingerprint;
mod project;

use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Cairn: fingerprints and a content-addressed cache for lazy computations.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about = "Cairn computation cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `cairn.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the fingerprints of a plan's roots.
    Fingerprint(FingerprintArgs),
    /// Inspect or prune the artifact cache.
    Cache {
        /// The cache action to run.
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Arguments for the `cairn fingerprint` subcommand.
#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// Path to a JSON plan file.
    pub plan: String,

    /// Fingerprint only this node instead of the plan's roots.
    #[arg(long)]
    pub root: Option<u32>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Actions of the `cairn cache` subcommand.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// List recorded artifacts.
    Ls {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
    /// Summarize the cache directory.
    Status,
    /// Remove artifacts the manifest does not record, or old artifacts.
    Gc {
        /// Also remove recorded artifacts older than this many days.
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

/// Output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_tracing(&global);

    let result = match cli.command {
        Command::Fingerprint(ref args) => fingerprint::run(args, &global),
        Command::Cache { ref action } => cache::run(action, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` applies unless a flag overrides it.
fn init_tracing(global: &GlobalArgs) {
    let filter = if global.verbose {
        EnvFilter::new("debug")
    } else if global.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
