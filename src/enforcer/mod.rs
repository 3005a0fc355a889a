//! Firewall enforcement: the ipset holding addresses and the iptables rule
//! matching it.

pub mod ipset;
pub mod iptables;

pub use ipset::IpSet;
pub use iptables::{Chain, IptablesRule, MatchDirection, RuleSpec, Target};

use crate::cmd_abstraction::{CommandExecutor, CommandLine};
use crate::error::{BlockyError, Result};

pub const IPSET_BIN: &str = "ipset";
pub const IPTABLES_BIN: &str = "iptables";

/// Check that ipset and iptables can be run and can read kernel state.
pub fn check_tools(executor: &dyn CommandExecutor) -> Result<()> {
    let probes = [
        CommandLine::new(IPTABLES_BIN).args(["-w", "-L", "-n"]),
        CommandLine::new(IPSET_BIN).args(["-L", "-n"]),
    ];

    for probe in &probes {
        let unavailable = |detail: String| BlockyError::ToolUnavailable {
            command: probe.program().to_string(),
            detail,
        };
        let output = probe
            .run(executor)
            .map_err(|e| unavailable(format!("{:#}", e)))?;
        if !output.success {
            return Err(unavailable(format!(
                "exit status: {}, error: {}",
                output
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                output.stderr.trim()
            )));
        }
    }
    Ok(())
}
