//! Process lifecycle around the reconciliation engine.

use tracing::info;

use crate::config::Settings;
use crate::enforcer::ipset::join_addresses;
use crate::error::Result;
use crate::reconcile::ReconciliationLoop;
use crate::signal::{ShutdownGuard, ShutdownToken};

/// Runs the engine until shutdown is requested or it fails, then always tears
/// the firewall state down.
pub struct LifecycleController {
    engine: ReconciliationLoop,
    shutdown: ShutdownToken,
}

impl LifecycleController {
    pub fn new(engine: ReconciliationLoop, shutdown: ShutdownToken) -> Self {
        Self { engine, shutdown }
    }

    pub fn engine(&self) -> &ReconciliationLoop {
        &self.engine
    }

    /// Set up, poll, tear down. Returns the error that ended the loop, if any,
    /// after teardown has run.
    pub async fn run(&mut self) -> Result<()> {
        let _signals = ShutdownGuard::install(self.shutdown.clone());

        let outcome = self.serve().await;
        self.engine.teardown();
        info!("blocky stopped");
        outcome
    }

    async fn serve(&mut self) -> Result<()> {
        self.engine.prepare_whitelist()?;
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.engine.prepare_blocklist()?;
        log_startup_notice(self.engine.settings());
        self.engine.run(&self.shutdown).await
    }
}

/// Log every effective setting once the rules are in place.
pub fn log_startup_notice(settings: &Settings) {
    info!("blocky startup. Settings:");
    info!("chain: {}", settings.chain);
    info!("check_every: {}", settings.poll_interval.as_secs());
    info!("domains: {}", settings.domains.join(", "));
    info!("ipset: {}", settings.blocklist_set);
    info!("pidfile: {}", settings.pidfile.display());
    info!("rule_pos: {}", settings.rule_position);
    info!("table: {}", settings.table);
    info!("whitelist_local_ips: {}", join_addresses(&settings.whitelist));
}
