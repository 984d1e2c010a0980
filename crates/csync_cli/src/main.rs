//! csync CLI
//!
//! Command-line front end for the csync directory synchronizer.
//!
//! # Commands
//!
//! - `sync` - Run one bidirectional sync between two directories
//! - `journal dump` - Print the recorded base versions
//! - `journal verify` - Check the journal log frame by frame
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Bidirectional directory synchronizer.
#[derive(Parser)]
#[command(name = "csync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration directory (defaults to ~/.csync)
    #[arg(global = true, short, long)]
    config_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize two directories
    Sync {
        /// Local directory
        local: PathBuf,

        /// Remote module directory
        remote: PathBuf,

        /// Additional exclude list (may be repeated)
        #[arg(short, long)]
        exclude: Vec<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect the sync journal
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum JournalCommands {
    /// Print every recorded base version
    Dump {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check frame integrity
    Verify,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync {
            local,
            remote,
            exclude,
            format,
        } => {
            let config_dir = commands::config_dir(cli.config_dir)?;
            let status = commands::sync::run(&config_dir, &local, &remote, &exclude, &format)?;
            // Fatal (-1) maps to 255, as a C exit(-1) would.
            return Ok(ExitCode::from(status.code() as u8));
        }
        Commands::Journal { command } => {
            let config_dir = commands::config_dir(cli.config_dir)?;
            match command {
                JournalCommands::Dump { format } => commands::journal::dump(&config_dir, &format)?,
                JournalCommands::Verify => commands::journal::verify(&config_dir)?,
            }
        }
        Commands::Version => {
            println!("{}", csync_core::csync_version());
            println!("csync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(ExitCode::SUCCESS)
}
