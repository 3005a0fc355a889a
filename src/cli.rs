//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "blocky")]
#[command(
    author,
    version,
    about = "Block traffic to domains with changing addresses using ipset and iptables"
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log to the console regardless of log_type
    #[arg(short, long, global = true)]
    pub foreground: bool,
}

impl Cli {
    pub fn command_or_default(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the daemon (default)
    Run,

    /// Validate the config file and the system without changing anything
    Check,

    /// Remove rules and sets left behind by an instance that did not shut down cleanly
    Cleanup,

    /// Show version
    Version,
}
