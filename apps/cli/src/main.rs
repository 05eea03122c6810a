//! dlpool CLI - Command-line downloader
//!
//! Downloads a list of URLs on a fixed pool of worker threads with a
//! progress bar per transfer.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// dlpool - threaded download engine
#[derive(Parser)]
#[command(name = "dlpool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, env = "DLPOOL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs
    Get(GetArgs),

    /// Show or initialise the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug, Default)]
pub struct GetArgs {
    /// URLs to download
    #[arg(required = true)]
    urls: Vec<String>,

    /// Directory to save files into
    #[arg(short = 'o', long)]
    dir: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long)]
    pool: Option<usize>,

    /// Chunk size in bytes
    #[arg(long)]
    buffer: Option<usize>,

    /// Read timeout per download, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Username for basic authentication
    #[arg(long, requires = "password", conflicts_with = "bearer")]
    user: Option<String>,

    /// Password for basic authentication
    #[arg(long, requires = "user")]
    password: Option<String>,

    /// Bearer token
    #[arg(long)]
    bearer: Option<String>,

    /// Proxy URL for every connection
    #[arg(long)]
    proxy: Option<String>,

    /// Extra request header, e.g. -H 'Referer: https://example.com'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the default configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Get(args) => {
            let config = commands::resolve_config(cli.config.as_deref())?;
            commands::get(config, args, cli.output)?
        }

        Commands::Config { action } => {
            commands::config_action(cli.config.as_deref(), action, cli.output)?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "dlpool", &mut std::io::stdout());
        }
    }

    Ok(())
}
