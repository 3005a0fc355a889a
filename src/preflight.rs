//! Startup checks, run once before any firewall state is touched.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cmd_abstraction::CommandExecutor;
use crate::config::{Config, Settings};
use crate::enforcer::{check_tools, Chain};
use crate::error::{BlockyError, Result};
use crate::fs_abstraction::FileSystem;
use crate::pidfile::parse_pid;
use crate::process::{ProcessControl, PROCESS_NAME};
use crate::validation::{
    validate_poll_interval, validate_rule_position, validate_rule_position_bound,
};

/// How long a running instance gets to tear down after SIGTERM.
pub const DEFAULT_TAKEOVER_TIMEOUT: Duration = Duration::from_secs(10);

const TAKEOVER_POLL: Duration = Duration::from_millis(100);

/// Validates the environment and turns a [`Config`] into [`Settings`].
pub struct Preflight<'a> {
    config: &'a Config,
    executor: Arc<dyn CommandExecutor>,
    fs: &'a dyn FileSystem,
    processes: &'a dyn ProcessControl,
    takeover: bool,
    takeover_timeout: Duration,
}

impl<'a> Preflight<'a> {
    pub fn new(
        config: &'a Config,
        executor: Arc<dyn CommandExecutor>,
        fs: &'a dyn FileSystem,
        processes: &'a dyn ProcessControl,
    ) -> Self {
        Self {
            config,
            executor,
            fs,
            processes,
            takeover: true,
            takeover_timeout: DEFAULT_TAKEOVER_TIMEOUT,
        }
    }

    /// Only report a running instance instead of terminating it.
    pub fn without_takeover(mut self) -> Self {
        self.takeover = false;
        self
    }

    pub fn with_takeover_timeout(mut self, timeout: Duration) -> Self {
        self.takeover_timeout = timeout;
        self
    }

    /// Run every check in order. The first failure aborts.
    pub fn run(&self) -> Result<Settings> {
        let poll_interval = validate_poll_interval(&self.config.check_every)?;

        let uid = self.processes.effective_uid();
        if uid != 0 {
            return Err(BlockyError::Permission(format!(
                "blocky must run as root to manage ipset and iptables (effective uid {})",
                uid
            )));
        }

        check_tools(self.executor.as_ref())?;

        let chain = Chain::open(
            &self.config.table,
            &self.config.chain,
            Arc::clone(&self.executor),
        )?;
        debug!("Found chain {} in table {}", chain.name(), chain.table());

        self.check_running_instance()?;

        let rule_position = validate_rule_position(&self.config.rule_pos)?;
        validate_rule_position_bound(rule_position, chain.rule_count()?)?;

        if self.config.domains.is_empty() {
            warn!("No domains configured, the blocklist set will stay empty");
        }

        Ok(Settings {
            table: chain.table().to_string(),
            chain: chain.name().to_string(),
            blocklist_set: self.config.ipset.clone(),
            domains: self.config.domains.clone(),
            whitelist: self.config.whitelist_addresses()?,
            poll_interval,
            rule_position,
            pidfile: self.config.pidfile.clone(),
        })
    }

    /// [`run`](Self::run) from async code. The takeover wait blocks, so the
    /// worker hands its other tasks off first. Needs the multi-threaded runtime.
    pub fn run_in_runtime(&self) -> Result<Settings> {
        tokio::task::block_in_place(|| self.run())
    }

    /// Deal with a pid left in the pidfile by another process.
    fn check_running_instance(&self) -> Result<()> {
        let path = self.config.pidfile.as_path();
        if !self.fs.is_file(path) {
            return Ok(());
        }
        let content = match self.fs.read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Ignoring unreadable pidfile {}: {}", path.display(), e);
                return Ok(());
            }
        };
        let Some(pid) = parse_pid(&content) else {
            debug!("Ignoring pidfile {} without a pid", path.display());
            return Ok(());
        };
        if pid == self.processes.current_pid() || !self.processes.is_alive(pid) {
            return Ok(());
        }

        let name = self.processes.process_name(pid);
        if name.as_deref() != Some(PROCESS_NAME) {
            return Err(BlockyError::Conflict(format!(
                "Pidfile {} points to running process {} ({}), which is not blocky. Abort.",
                path.display(),
                pid,
                name.as_deref().unwrap_or("unknown")
            )));
        }

        if !self.takeover {
            info!("blocky is already running with pid {}", pid);
            return Ok(());
        }

        warn!("blocky is already running with pid {}, terminating it", pid);
        self.processes.terminate(pid).map_err(|e| {
            BlockyError::Conflict(format!(
                "Failed to terminate running blocky process {}: {}. Abort.",
                pid, e
            ))
        })?;

        let deadline = Instant::now() + self.takeover_timeout;
        while self.processes.is_alive(pid) {
            if Instant::now() >= deadline {
                return Err(BlockyError::Conflict(format!(
                    "Running blocky process {} did not exit within {}s. Abort.",
                    pid,
                    self.takeover_timeout.as_secs()
                )));
            }
            thread::sleep(TAKEOVER_POLL);
        }
        info!("Previous blocky process {} exited", pid);
        Ok(())
    }
}
