//! ipset management: one named `hash:ip` set per [`IpSet`].

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::IPSET_BIN;
use crate::cmd_abstraction::{CommandExecutor, CommandLine, CommandOutput};
use crate::error::{BlockyError, Result};

/// stderr of `ipset create` when the set is already there.
const ALREADY_EXISTS: &str = "set with the same name already exists";

const SET_TYPE: &str = "hash:ip";
const HASH_SIZE: &str = "4096";

/// A kernel address set owned by this process.
pub struct IpSet {
    name: String,
    executor: Arc<dyn CommandExecutor>,
    /// Membership last pushed to the kernel, `None` until the first push.
    last_synced: Option<Vec<Ipv4Addr>>,
}

impl IpSet {
    pub fn new(name: impl Into<String>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
            last_synced: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Addresses currently in the set, as far as this process knows.
    pub fn members(&self) -> &[Ipv4Addr] {
        self.last_synced.as_deref().unwrap_or(&[])
    }

    /// Create the set unless it already exists.
    pub fn ensure_exists(&self) -> Result<()> {
        let cmd = self
            .command("create")
            .args([SET_TYPE, "hashsize", HASH_SIZE]);
        debug!("Creating ipset: {}", cmd);

        let output = self.run(&cmd)?;
        if output.success {
            info!("Creating ipset {}", self.name);
            return Ok(());
        }
        if output.stdout.trim().is_empty() && output.stderr.contains(ALREADY_EXISTS) {
            info!("ipset {} exists", self.name);
            return Ok(());
        }
        Err(self.failure(&cmd, &output))
    }

    /// Bring the set to exactly `desired`.
    ///
    /// Returns `Ok(false)` without touching the kernel when `desired` matches the
    /// last pushed membership. Otherwise flushes and re-adds every address.
    pub fn synchronize(&mut self, desired: &[Ipv4Addr]) -> Result<bool> {
        let mut desired = desired.to_vec();
        desired.sort_unstable();
        desired.dedup();

        if self.last_synced.as_ref() == Some(&desired) {
            return Ok(false);
        }

        info!(
            "Updating ipset {} with IP addresses: {}",
            self.name,
            join_addresses(&desired)
        );

        // The kernel state is unknown until every command below has succeeded.
        self.last_synced = None;

        let flush = self.command("flush");
        debug!("{}", flush);
        self.run_checked(&flush)?;

        for address in &desired {
            let add = self.command("add").arg(address.to_string());
            debug!("{}", add);
            self.run_checked(&add)?;
        }

        self.last_synced = Some(desired);
        Ok(true)
    }

    /// Destroy the set. Failures are logged only.
    pub fn destroy(&self) {
        info!("Destroying ipset: {}", self.name);
        let cmd = self.command("destroy");
        match self.run(&cmd) {
            Ok(output) if output.success => {}
            Ok(output) => warn!(
                "Failed to destroy ipset {}: {}",
                self.name,
                output.stderr.trim()
            ),
            Err(e) => warn!("Failed to destroy ipset {}: {}", self.name, e),
        }
    }

    fn command(&self, action: &str) -> CommandLine {
        CommandLine::new(IPSET_BIN).arg(action).arg(self.name.as_str())
    }

    fn run(&self, cmd: &CommandLine) -> Result<CommandOutput> {
        cmd.run(self.executor.as_ref())
            .map_err(|e| BlockyError::IpSet(format!("{:#}", e)))
    }

    fn run_checked(&self, cmd: &CommandLine) -> Result<()> {
        let output = self.run(cmd)?;
        if output.success {
            Ok(())
        } else {
            Err(self.failure(cmd, &output))
        }
    }

    fn failure(&self, cmd: &CommandLine, output: &CommandOutput) -> BlockyError {
        BlockyError::IpSet(format!("`{}` failed: {}", cmd, output.stderr.trim()))
    }
}

/// Comma separated rendering used in log lines.
pub fn join_addresses(addresses: &[Ipv4Addr]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
