//! Run command implementation: the daemon itself.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
use crate::config::Config;
use crate::daemon::LifecycleController;
use crate::dns::AddressResolver;
use crate::fs_abstraction::real_fs;
use crate::pidfile::PidFile;
use crate::preflight::Preflight;
use crate::process::LinuxProcesses;
use crate::reconcile::ReconciliationLoop;
use crate::signal::ShutdownToken;

/// Run the run command
pub async fn run(config_path: &Path, config: &Config) -> Result<()> {
    info!("Config file: {}", config_path.display());

    let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor::new());
    let settings = Preflight::new(config, Arc::clone(&executor), real_fs(), &LinuxProcesses)
        .run_in_runtime()?;

    let _pidfile = PidFile::create(&settings.pidfile)?;

    let engine = ReconciliationLoop::new(settings, executor, AddressResolver::system());
    let mut controller = LifecycleController::new(engine, ShutdownToken::new());
    controller.run().await?;
    Ok(())
}
