//! Root CLI structure with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Manage llama-server instances across local GPUs.
#[derive(Debug, Parser)]
#[command(name = "llamactl")]
#[command(about = "Load, switch and inspect llama-server instances per GPU")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to `<data dir>/config.json`)
    #[arg(short = 'c', long = "config", env = "LLAMACTL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
