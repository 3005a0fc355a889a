//! The reconciliation engine.
//!
//! Owns two (set, rule) pairs: the local whitelist, accepted ahead of
//! everything else, and the blocklist, re-resolved from the domain list every
//! poll interval. Both pairs are torn down in reverse creation order.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cmd_abstraction::CommandExecutor;
use crate::config::{Settings, WHITELIST_SET_NAME};
use crate::dns::AddressResolver;
use crate::enforcer::ipset::join_addresses;
use crate::enforcer::{Chain, IpSet, IptablesRule, MatchDirection, RuleSpec, Target};
use crate::error::{BlockyError, Result};
use crate::signal::ShutdownToken;

/// Comment carried by the blocklist rule
pub const BLOCKLIST_MARKER: &str = "Blocky IPTables Rule";

/// Comment carried by the whitelist rule
pub const WHITELIST_MARKER: &str = "Blocky Whitelist IPTables Rule";

/// Every this many cycles the resolved addresses are logged at info level.
pub const SUMMARY_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    WhitelistReady,
    Running,
    ShuttingDown,
    Stopped,
}

/// A set and the rule matching it.
struct ManagedPair {
    set: IpSet,
    /// Recorded before insertion is attempted; deletion goes by marker.
    rule: Option<IptablesRule>,
}

impl ManagedPair {
    fn new(set: IpSet) -> Self {
        Self { set, rule: None }
    }

    fn teardown(self) {
        if let Some(rule) = &self.rule {
            match rule.delete() {
                Ok(0) => debug!("No rule \"{}\" left to delete", rule.spec().marker),
                Ok(_) => {}
                Err(e) => warn!("Failed to delete rule \"{}\": {}", rule.spec().marker, e),
            }
        }
        self.set.destroy();
    }
}

pub struct ReconciliationLoop {
    settings: Settings,
    executor: Arc<dyn CommandExecutor>,
    resolver: AddressResolver,
    state: EngineState,
    chain: Option<Chain>,
    whitelist: Option<ManagedPair>,
    blocklist: Option<ManagedPair>,
    cycles: u32,
}

impl ReconciliationLoop {
    pub fn new(
        settings: Settings,
        executor: Arc<dyn CommandExecutor>,
        resolver: AddressResolver,
    ) -> Self {
        Self {
            settings,
            executor,
            resolver,
            state: EngineState::Init,
            chain: None,
            whitelist: None,
            blocklist: None,
            cycles: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Addresses currently pushed into the blocklist set.
    pub fn blocked(&self) -> &[Ipv4Addr] {
        self.blocklist
            .as_ref()
            .map(|pair| pair.set.members())
            .unwrap_or(&[])
    }

    /// Create the whitelist set and rule, and fill the set.
    pub fn prepare_whitelist(&mut self) -> Result<()> {
        let chain = self.chain()?;

        let set = IpSet::new(WHITELIST_SET_NAME, Arc::clone(&self.executor));
        set.ensure_exists()?;
        let pair = self.whitelist.insert(ManagedPair::new(set));

        let rule = pair.rule.insert(IptablesRule::new(
            chain,
            whitelist_spec(),
        ));
        rule.ensure_inserted(self.settings.rule_position)?;

        if !self.settings.whitelist.is_empty() {
            info!(
                "Whitelisting local IP addresses: {}",
                join_addresses(&self.settings.whitelist)
            );
        }
        pair.set.synchronize(&self.settings.whitelist)?;

        self.state = EngineState::WhitelistReady;
        Ok(())
    }

    /// Create the blocklist set and insert its rule right after the whitelist rule.
    pub fn prepare_blocklist(&mut self) -> Result<()> {
        let chain = self.chain()?;

        let whitelist_number = match self.whitelist.as_ref().and_then(|p| p.rule.as_ref()) {
            Some(rule) => rule.find_existing()?,
            None => None,
        };
        let position = match whitelist_number {
            // 1-based rule number of the whitelist rule == 0-based offset right after it
            Some(number) => number,
            None => {
                warn!(
                    "Whitelist rule not found in chain {}, inserting the block rule at position {}",
                    chain.name(),
                    self.settings.rule_position
                );
                self.settings.rule_position
            }
        };

        let set = IpSet::new(self.settings.blocklist_set.as_str(), Arc::clone(&self.executor));
        set.ensure_exists()?;
        let pair = self.blocklist.insert(ManagedPair::new(set));

        let spec = blocklist_spec(&self.settings.blocklist_set);
        let rule = pair.rule.insert(IptablesRule::new(chain, spec));
        rule.ensure_inserted(position)?;

        self.state = EngineState::Running;
        Ok(())
    }

    /// Record the pairs without creating anything, so [`teardown`](Self::teardown)
    /// removes whatever a previous instance left behind.
    pub fn attach(&mut self) -> Result<()> {
        let chain = self.chain()?;

        let mut whitelist = ManagedPair::new(IpSet::new(
            WHITELIST_SET_NAME,
            Arc::clone(&self.executor),
        ));
        whitelist.rule = Some(IptablesRule::new(chain.clone(), whitelist_spec()));
        self.whitelist = Some(whitelist);

        let mut blocklist = ManagedPair::new(IpSet::new(
            self.settings.blocklist_set.as_str(),
            Arc::clone(&self.executor),
        ));
        blocklist.rule = Some(IptablesRule::new(
            chain,
            blocklist_spec(&self.settings.blocklist_set),
        ));
        self.blocklist = Some(blocklist);

        self.state = EngineState::Running;
        Ok(())
    }

    /// One poll cycle: resolve the domains and push the result into the
    /// blocklist set. Returns whether the set changed.
    pub async fn run_cycle(&mut self) -> Result<bool> {
        let addresses = self.resolver.resolve(&self.settings.domains).await;

        self.cycles += 1;
        if self.cycles >= SUMMARY_EVERY {
            info!("Blocked IP addresses: {}", join_addresses(&addresses));
            self.cycles = 0;
        }

        let pair = self.blocklist.as_mut().ok_or_else(|| {
            BlockyError::IpSet(format!(
                "ipset {} has not been created",
                self.settings.blocklist_set
            ))
        })?;
        pair.set.synchronize(&addresses)
    }

    /// Poll until `shutdown` is cancelled. Errors end the loop unretried.
    pub async fn run(&mut self, shutdown: &ShutdownToken) -> Result<()> {
        debug!("check_every: {}s", self.settings.poll_interval.as_secs());
        while !shutdown.is_cancelled() {
            self.run_cycle().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.cancelled() => {}
            }
        }
        debug!("Shutdown requested, leaving the poll loop");
        Ok(())
    }

    /// Remove everything that was set up, newest first. Safe to call twice.
    pub fn teardown(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        self.state = EngineState::ShuttingDown;

        if let Some(pair) = self.blocklist.take() {
            pair.teardown();
        }
        if let Some(pair) = self.whitelist.take() {
            pair.teardown();
        }

        self.state = EngineState::Stopped;
    }

    fn chain(&mut self) -> Result<Chain> {
        if let Some(chain) = &self.chain {
            return Ok(chain.clone());
        }
        let chain = Chain::open(
            &self.settings.table,
            &self.settings.chain,
            Arc::clone(&self.executor),
        )?;
        self.chain = Some(chain.clone());
        Ok(chain)
    }
}

fn whitelist_spec() -> RuleSpec {
    RuleSpec {
        set_name: WHITELIST_SET_NAME.to_string(),
        direction: MatchDirection::Dst,
        target: Target::Accept,
        marker: WHITELIST_MARKER.to_string(),
    }
}

fn blocklist_spec(set_name: &str) -> RuleSpec {
    RuleSpec {
        set_name: set_name.to_string(),
        direction: MatchDirection::Src,
        target: Target::Drop,
        marker: BLOCKLIST_MARKER.to_string(),
    }
}
