//! Cleanup command implementation.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
use crate::config::Config;
use crate::dns::AddressResolver;
use crate::fs_abstraction::real_fs;
use crate::pidfile::PidFile;
use crate::preflight::Preflight;
use crate::process::LinuxProcesses;
use crate::reconcile::ReconciliationLoop;

/// Remove the rules and sets of an instance that died without tearing down.
///
/// Refuses to run while another instance holds the pidfile.
pub fn run(config: &Config) -> Result<()> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor::new());
    let settings = Preflight::new(config, Arc::clone(&executor), real_fs(), &LinuxProcesses)
        .without_takeover()
        .run()?;

    let _pidfile = PidFile::create(&settings.pidfile)?;

    info!("Removing leftover blocky rules and sets...");
    let mut engine = ReconciliationLoop::new(settings, executor, AddressResolver::system());
    engine.attach()?;
    engine.teardown();

    println!("[OK] blocky rules and sets removed");
    Ok(())
}
