//! Harvester CLI - command-line interface for the repository harvester.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use console::Term;
use harvester::{RepoSlug, Stream};
use tracing_subscriber::EnvFilter;

use crate::commands::limits::OutputFormat;

#[derive(Parser)]
#[command(name = "harvester")]
#[command(version)]
#[command(about = "A resumable GitHub repository data harvester")]
#[command(
    long_about = "Harvester collects commits (with per-file changes), pull requests with their \
requested reviewers, and contributor profiles with follow relationships from one GitHub \
repository into CSV tables. It respects the API rate limit and checkpoints after every item, \
so an interrupted run resumes where it stopped."
)]
#[command(after_long_help = r#"EXAMPLES
    Harvest everything from a repository:
        $ harvester run --repo rust-lang/cargo

    Harvest only commits, at most 200 of them:
        $ harvester run commits --repo rust-lang/cargo --max-commits 200

    Show what has been collected so far:
        $ harvester status --repo rust-lang/cargo

    Start the pull request stream over:
        $ harvester reset pull-requests --repo rust-lang/cargo

    Generate shell completions:
        $ harvester completions bash > ~/.local/share/bash-completion/completions/harvester

CONFIGURATION
    Harvester reads configuration from:
      1. ~/.config/harvester/config.toml (or $XDG_CONFIG_HOME/harvester/config.toml)
      2. ./harvester.toml
      3. Environment variables (HARVESTER__ prefix, e.g., HARVESTER__HARVEST__MAX_COMMITS)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    GITHUB_TOKEN                       GitHub personal access token
    HARVESTER__GITHUB__TOKEN           GitHub token (takes precedence over GITHUB_TOKEN)
    HARVESTER__GITHUB__API_URL         API root (default: https://api.github.com)
    HARVESTER__HARVEST__REPOSITORY     Default repository (owner/name)
    HARVESTER__HARVEST__OUTPUT_DIR     Directory for CSV tables and the checkpoint
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect data, resuming from the checkpoint
    ///
    /// Runs the selected streams in order: commits, pull requests, developers.
    /// With no streams given, all three run.
    Run(RunArgs),
    /// Show checkpoint progress per stream
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Forget checkpoint progress so streams start over
    ///
    /// Output tables are left untouched.
    Reset {
        /// Stream to reset (all streams if omitted)
        stream: Option<Stream>,

        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show current rate limit status
    Limits {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Which repository and where its files live.
#[derive(Debug, Clone, Args)]
struct TargetArgs {
    /// Repository as owner/name (default from config)
    #[arg(short, long)]
    repo: Option<RepoSlug>,

    /// Directory for CSV tables and the checkpoint (default from config)
    #[arg(short = 'd', long)]
    output_dir: Option<PathBuf>,

    /// Checkpoint file (default: <output-dir>/checkpoint.json)
    #[arg(short, long)]
    checkpoint: Option<PathBuf>,
}

/// Options for the run command.
#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Streams to run: commits, pull-requests, developers
    streams: Vec<Stream>,

    #[command(flatten)]
    target: TargetArgs,

    /// Only collect commits and pull requests from this many days back
    #[arg(short = 'l', long)]
    lookback_days: Option<i64>,

    /// Stop the commit stream after this many commits
    #[arg(long)]
    max_commits: Option<usize>,

    /// Stop the pull request stream after this many pull requests
    #[arg(long)]
    max_pull_requests: Option<usize>,

    /// Stop the developer stream after this many developers
    #[arg(long)]
    max_developers: Option<usize>,

    /// Follow relationships fetched per developer
    #[arg(long)]
    max_following: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Structured logging only when not connected to a TTY; the interactive
    // reporter owns the terminal otherwise.
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("harvester=info,harvester_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let shutdown_flag = shutdown::setup_shutdown_handler();
            commands::run::handle_run(args, &config, shutdown_flag).await?;
        }
        Commands::Status { target } => {
            commands::status::handle_status(&target, &config)?;
        }
        Commands::Reset { stream, target } => {
            commands::reset::handle_reset(stream, &target, &config)?;
        }
        Commands::Limits { output } => {
            commands::limits::handle_limits(output, &config).await?;
        }
        Commands::Completions { shell } => {
            commands::meta::handle_completions(shell)?;
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output)?;
        }
    }

    Ok(())
}
