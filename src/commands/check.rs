//! Check command implementation.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
use crate::config::{Config, Settings};
use crate::enforcer::ipset::join_addresses;
use crate::fs_abstraction::real_fs;
use crate::preflight::Preflight;
use crate::process::LinuxProcesses;

/// Run the check command
pub fn run(config_path: &Path, config: &Config) -> Result<()> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor::new());
    let settings = Preflight::new(config, executor, real_fs(), &LinuxProcesses)
        .without_takeover()
        .run()?;

    println!("[OK] {} is valid", config_path.display());
    print!("{}", render_settings(&settings));
    Ok(())
}

fn render_settings(settings: &Settings) -> String {
    let domains = if settings.domains.is_empty() {
        "(none)".to_string()
    } else {
        settings.domains.join(", ")
    };
    let whitelist = if settings.whitelist.is_empty() {
        "(none)".to_string()
    } else {
        join_addresses(&settings.whitelist)
    };

    format!(
        "  table:       {}\n  chain:       {}\n  rule_pos:    {}\n  ipset:       {}\n  check_every: {}s\n  pidfile:     {}\n  domains:     {}\n  whitelist:   {}\n",
        settings.table,
        settings.chain,
        settings.rule_position,
        settings.blocklist_set,
        settings.poll_interval.as_secs(),
        settings.pidfile.display(),
        domains,
        whitelist
    )
}
