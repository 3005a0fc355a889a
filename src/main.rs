//! blocky - keeps an ipset and an iptables rule in sync with the addresses of
//! a domain list.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, Level};

use blocky::cli::{Cli, Commands};
use blocky::config::Config;
use blocky::error::exit_code_for;
use blocky::logging::{self, LogConfig, LogType};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command_or_default();

    if command == Commands::Version {
        println!("blocky {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Nothing is logged before the log settings are known, so report on stderr
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    let log_config = match LogConfig::from_config(&config) {
        Ok(log_config) => apply_overrides(log_config, &cli),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    if let Err(e) = logging::init(&log_config) {
        eprintln!("Error: failed to set up logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match command {
        Commands::Run => blocky::commands::run::run(&cli.config, &config).await,
        Commands::Check => blocky::commands::check::run(&cli.config, &config),
        Commands::Cleanup => blocky::commands::cleanup::run(&config),
        Commands::Version => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if log_config.kind != LogType::Console {
                error!("{:#}", e);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// `--foreground` sends logs to the console, `--verbose` lowers the level to debug.
fn apply_overrides(mut log_config: LogConfig, cli: &Cli) -> LogConfig {
    if cli.foreground {
        log_config.kind = LogType::Console;
    }
    if cli.verbose {
        log_config.level = Level::DEBUG;
    }
    log_config
}
