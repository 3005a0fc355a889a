//! iptables rule management.
//!
//! Rules are found by their `comment` match and deleted by their full
//! specification. Rule numbers are never kept between two commands, since
//! other tools may insert or remove rules above ours at any time.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::IPTABLES_BIN;
use crate::cmd_abstraction::{CommandExecutor, CommandLine, CommandOutput};
use crate::error::{BlockyError, Result};

/// Which address of the packet is matched against the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDirection {
    Src,
    Dst,
}

impl MatchDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchDirection::Src => "src",
            MatchDirection::Dst => "dst",
        }
    }
}

impl fmt::Display for MatchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Drop,
    Accept,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Drop => "DROP",
            Target::Accept => "ACCEPT",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing chain inside a table.
#[derive(Clone)]
pub struct Chain {
    table: String,
    name: String,
    executor: Arc<dyn CommandExecutor>,
}

impl Chain {
    /// Look the chain up, failing with `TableNotFound` / `ChainNotFound`.
    pub fn open(table: &str, chain: &str, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let table = table.trim().to_lowercase();
        let cmd = CommandLine::new(IPTABLES_BIN).args(["-w", "-t", table.as_str(), "-S"]);
        let output = run(executor.as_ref(), &cmd)?;

        if !output.success {
            let stderr = output.stderr.to_lowercase();
            if stderr.contains("does not exist") || stderr.contains("can't initialize") {
                return Err(BlockyError::TableNotFound(table));
            }
            return Err(failure(&cmd, &output));
        }

        if !lists_chain(&output.stdout, chain) {
            return Err(BlockyError::ChainNotFound {
                table,
                chain: chain.to_string(),
            });
        }

        Ok(Self {
            table,
            name: chain.to_string(),
            executor,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The chain's rules as printed by `iptables -S`, in evaluation order.
    pub fn rules(&self) -> Result<Vec<String>> {
        let cmd = self.command("-S");
        let output = run(self.executor.as_ref(), &cmd)?;
        if !output.success {
            return Err(failure(&cmd, &output));
        }
        Ok(parse_rule_listing(&output.stdout))
    }

    pub fn rule_count(&self) -> Result<usize> {
        Ok(self.rules()?.len())
    }

    /// `iptables -w -t <table> <op> <chain>`
    fn command(&self, op: &str) -> CommandLine {
        CommandLine::new(IPTABLES_BIN).args(["-w", "-t", self.table.as_str(), op, self.name.as_str()])
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("table", &self.table)
            .field("name", &self.name)
            .finish()
    }
}

/// What a managed rule looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub set_name: String,
    pub direction: MatchDirection,
    pub target: Target,
    /// Comment identifying the rule across restarts.
    pub marker: String,
}

/// One marker-identified rule in a chain.
#[derive(Debug, Clone)]
pub struct IptablesRule {
    chain: Chain,
    spec: RuleSpec,
}

impl IptablesRule {
    pub fn new(chain: Chain, spec: RuleSpec) -> Self {
        Self { chain, spec }
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Rule number (1-based) of the first rule carrying the marker.
    pub fn find_existing(&self) -> Result<Option<usize>> {
        let rules = self.chain.rules()?;
        Ok(rules
            .iter()
            .position(|rule| has_comment(rule, &self.spec.marker))
            .map(|index| index + 1))
    }

    /// Insert the rule at `position` (0-based) unless it is already present.
    ///
    /// Returns whether a rule was inserted.
    pub fn ensure_inserted(&self, position: usize) -> Result<bool> {
        if let Some(number) = self.find_existing()? {
            debug!(
                "Rule \"{}\" already present at position {} in chain {}",
                self.spec.marker, number, self.chain.name
            );
            return Ok(false);
        }

        info!(
            "Inserting a rule with target {} into chain {} (table {}) for ipset \"{}\" (with comment \"{}\", rule position: {})",
            self.spec.target,
            self.chain.name,
            self.chain.table,
            self.spec.set_name,
            self.spec.marker,
            position
        );

        let cmd = self
            .chain
            .command("-I")
            .arg((position + 1).to_string())
            .args(rule_arguments(&self.spec));
        debug!("{}", cmd);
        let output = run(self.chain.executor.as_ref(), &cmd)?;
        if !output.success {
            return Err(failure(&cmd, &output));
        }
        Ok(true)
    }

    /// Delete every rule carrying the marker. Returns how many were removed.
    ///
    /// Each rule is deleted by its full specification as listed, so rules
    /// inserted or removed by other tools in the meantime are never touched.
    pub fn delete(&self) -> Result<usize> {
        let matching: Vec<Vec<String>> = self
            .chain
            .rules()?
            .iter()
            .filter(|rule| has_comment(rule, &self.spec.marker))
            .map(|rule| rule_body(rule))
            .collect();

        let mut removed = 0;
        for body in matching {
            info!(
                "Deleting rule \"{}\" (chain {})",
                self.spec.marker, self.chain.name
            );
            let cmd = self.chain.command("-D").args(body);
            debug!("{}", cmd);
            let output = run(self.chain.executor.as_ref(), &cmd)?;
            if output.success {
                removed += 1;
            } else if is_missing_rule(&output.stderr) {
                debug!("Rule \"{}\" already gone", self.spec.marker);
            } else {
                return Err(failure(&cmd, &output));
            }
        }
        Ok(removed)
    }
}

/// Match and target arguments for a rule, in iptables order.
pub fn rule_arguments(spec: &RuleSpec) -> Vec<String> {
    vec![
        "-p".into(),
        "tcp".into(),
        "-m".into(),
        "comment".into(),
        "--comment".into(),
        spec.marker.clone(),
        "-m".into(),
        "set".into(),
        "--match-set".into(),
        spec.set_name.clone(),
        spec.direction.as_str().into(),
        "-j".into(),
        spec.target.as_str().into(),
    ]
}

/// Keep the `-A` lines of an `iptables -S <chain>` listing.
pub fn parse_rule_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("-A "))
        .map(str::to_string)
        .collect()
}

/// Words of an `-A <chain> ...` line after the chain name.
fn rule_body(rule: &str) -> Vec<String> {
    split_words(rule).into_iter().skip(2).collect()
}

/// iptables refusing `-D` because no rule matches the given specification.
fn is_missing_rule(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("does a matching rule exist") || stderr.contains("bad rule")
}

/// Does an `iptables -S` table listing declare the chain?
fn lists_chain(listing: &str, chain: &str) -> bool {
    listing.lines().any(|line| {
        let mut words = line.split_whitespace();
        matches!(words.next(), Some("-P") | Some("-N")) && words.next() == Some(chain)
    })
}

/// Does the rule carry exactly this comment?
pub fn has_comment(rule: &str, marker: &str) -> bool {
    let words = split_words(rule);
    words
        .windows(2)
        .any(|pair| pair[0] == "--comment" && pair[1] == marker)
}

/// Split an `iptables -S` line into words, honouring double quotes and
/// backslash escapes the way iptables prints them.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn run(executor: &dyn CommandExecutor, cmd: &CommandLine) -> Result<CommandOutput> {
    cmd.run(executor)
        .map_err(|e| BlockyError::Iptables(format!("{:#}", e)))
}

fn failure(cmd: &CommandLine, output: &CommandOutput) -> BlockyError {
    BlockyError::Iptables(format!("`{}` failed: {}", cmd, output.stderr.trim()))
}
