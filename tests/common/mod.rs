//! Shared fixtures: an in-memory ipset/iptables and a static resolver.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blocky::cmd_abstraction::{CommandExecutor, CommandOutput};
use blocky::config::Settings;
use blocky::dns::{HostLookup, LookupError};

const BUILTIN_CHAINS: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];

#[derive(Default)]
struct State {
    sets: BTreeMap<String, BTreeSet<Ipv4Addr>>,
    /// chain name -> rules, each rule being its argument words
    chains: BTreeMap<String, Vec<Vec<String>>>,
    ops: Vec<String>,
    fail_ipset_action: Option<String>,
}

/// Simulates the `filter` table and the kernel's ipsets closely enough for
/// the commands blocky runs. Clones share state.
#[derive(Clone)]
pub struct FakeFirewall {
    state: Arc<Mutex<State>>,
}

impl FakeFirewall {
    pub fn new() -> Self {
        let mut state = State::default();
        for chain in BUILTIN_CHAINS {
            state.chains.insert(chain.to_string(), Vec::new());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Append a rule given in `iptables -A` argument form, e.g. `-i lo -j ACCEPT`.
    pub fn with_rule(self, chain: &str, rule: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let words = rule.split_whitespace().map(str::to_string).collect();
            state.chains.entry(chain.to_string()).or_default().push(words);
        }
        self
    }

    /// Insert a rule at a 0-based index, the way another tool would.
    pub fn insert_rule(&self, chain: &str, index: usize, rule: &str) {
        let mut state = self.state.lock().unwrap();
        let words = rule.split_whitespace().map(str::to_string).collect();
        state.chains.entry(chain.to_string()).or_default().insert(index, words);
    }

    /// Make every `ipset <action>` fail from now on.
    pub fn fail_ipset(&self, action: &str) {
        self.state.lock().unwrap().fail_ipset_action = Some(action.to_string());
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::new(self.clone())
    }

    /// State changing operations, oldest first.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    /// Comment of each rule in the chain, or the raw rule when it has none.
    pub fn rule_labels(&self, chain: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .chains
            .get(chain)
            .map(|rules| {
                rules
                    .iter()
                    .map(|words| comment_of(words).unwrap_or_else(|| words.join(" ")))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_marker(&self, chain: &str, marker: &str) -> usize {
        self.rule_labels(chain)
            .iter()
            .filter(|label| *label == marker)
            .count()
    }

    pub fn set_members(&self, name: &str) -> Option<Vec<Ipv4Addr>> {
        let state = self.state.lock().unwrap();
        state.sets.get(name).map(|m| m.iter().copied().collect())
    }

    pub fn set_names(&self) -> Vec<String> {
        self.state.lock().unwrap().sets.keys().cloned().collect()
    }

    fn ipset(&self, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        let action = args.first().map(String::as_str).unwrap_or("");
        if action == "-L" {
            let names: Vec<String> = state.sets.keys().cloned().collect();
            return CommandOutput::ok(names.join("\n"));
        }
        if state.fail_ipset_action.as_deref() == Some(action) {
            return CommandOutput::failed("ipset v7.10: Kernel error received: Operation not permitted");
        }
        let name = args.get(1).cloned().unwrap_or_default();

        match action {
            "create" => {
                if state.sets.contains_key(&name) {
                    return CommandOutput::failed(
                        "ipset v7.10: Set cannot be created: set with the same name already exists",
                    );
                }
                state.sets.insert(name.clone(), BTreeSet::new());
                state.ops.push(format!("create set {}", name));
            }
            "destroy" => {
                if state.sets.remove(&name).is_none() {
                    return CommandOutput::failed(
                        "ipset v7.10: The set with the given name does not exist",
                    );
                }
                state.ops.push(format!("destroy set {}", name));
            }
            "flush" | "add" => {
                let Some(members) = state.sets.get_mut(&name) else {
                    return CommandOutput::failed(
                        "ipset v7.10: The set with the given name does not exist",
                    );
                };
                if action == "flush" {
                    members.clear();
                    state.ops.push(format!("flush set {}", name));
                } else {
                    let Some(address) = args.get(2).and_then(|a| a.parse::<Ipv4Addr>().ok()) else {
                        return CommandOutput::failed("ipset v7.10: Syntax error");
                    };
                    members.insert(address);
                    state.ops.push(format!("add {} {}", name, address));
                }
            }
            other => return CommandOutput::failed(format!("ipset: unknown command {}", other)),
        }
        CommandOutput::ok("")
    }

    fn iptables(&self, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["-w", "-L", "-n"] => CommandOutput::ok("Chain INPUT (policy ACCEPT)\n"),
            ["-w", "-t", table, rest @ ..] => {
                if *table != "filter" {
                    return CommandOutput::failed(format!(
                        "iptables v1.8.7 (legacy): can't initialize iptables table `{}': Table does not exist (do you need to insmod?)",
                        table
                    ));
                }
                match rest {
                    ["-S"] => {
                        let mut out = String::new();
                        for chain in state.chains.keys() {
                            if BUILTIN_CHAINS.contains(&chain.as_str()) {
                                out.push_str(&format!("-P {} ACCEPT\n", chain));
                            } else {
                                out.push_str(&format!("-N {}\n", chain));
                            }
                        }
                        CommandOutput::ok(out)
                    }
                    ["-S", chain] => match state.chains.get(*chain) {
                        Some(rules) => {
                            let mut out = format!("-P {} ACCEPT\n", chain);
                            for words in rules {
                                out.push_str(&format!("-A {} {}\n", chain, render(words)));
                            }
                            CommandOutput::ok(out)
                        }
                        None => CommandOutput::failed("iptables: No chain/target/match by that name."),
                    },
                    ["-I", chain, number, rule @ ..] => {
                        let Some(rules) = state.chains.get_mut(*chain) else {
                            return CommandOutput::failed("iptables: No chain/target/match by that name.");
                        };
                        let index = match number.parse::<usize>() {
                            Ok(n) if n >= 1 && n - 1 <= rules.len() => n - 1,
                            _ => return CommandOutput::failed("iptables: Index of insertion too big."),
                        };
                        let words: Vec<String> = rule.iter().map(|w| w.to_string()).collect();
                        let label = comment_of(&words).unwrap_or_default();
                        rules.insert(index, words);
                        state.ops.push(format!("insert rule {}", label));
                        CommandOutput::ok("")
                    }
                    ["-D", chain, rule @ ..] => {
                        let Some(rules) = state.chains.get_mut(*chain) else {
                            return CommandOutput::failed("iptables: No chain/target/match by that name.");
                        };
                        let found = rules.iter().position(|words| {
                            words.len() == rule.len() && words.iter().zip(rule).all(|(w, r)| w == r)
                        });
                        let Some(index) = found else {
                            return CommandOutput::failed(
                                "iptables: Bad rule (does a matching rule exist in that chain?).",
                            );
                        };
                        let words = rules.remove(index);
                        let label = comment_of(&words).unwrap_or_default();
                        state.ops.push(format!("delete rule {}", label));
                        CommandOutput::ok("")
                    }
                    _ => CommandOutput::failed("iptables: unsupported invocation"),
                }
            }
            _ => CommandOutput::failed("iptables: unsupported invocation"),
        }
    }
}

impl CommandExecutor for FakeFirewall {
    fn execute(&self, cmd: &str, args: &[String]) -> anyhow::Result<CommandOutput> {
        match cmd {
            "ipset" => Ok(self.ipset(args)),
            "iptables" => Ok(self.iptables(args)),
            other => anyhow::bail!("Failed to execute {}: No such file or directory", other),
        }
    }
}

fn comment_of(words: &[String]) -> Option<String> {
    words
        .windows(2)
        .find(|pair| pair[0] == "--comment")
        .map(|pair| pair[1].clone())
}

/// Render rule words the way `iptables -S` prints them.
fn render(words: &[String]) -> String {
    words
        .iter()
        .map(|w| {
            if w.contains(' ') {
                format!("\"{}\"", w)
            } else {
                w.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolver answering from a fixed table; unknown names do not exist.
pub struct StaticLookup {
    answers: HashMap<String, Vec<Ipv4Addr>>,
    on_lookup: Option<Box<dyn Fn() + Send + Sync>>,
}

impl StaticLookup {
    /// `answers` pairs a domain with its space separated addresses.
    pub fn new(answers: &[(&str, &str)]) -> Self {
        let answers = answers
            .iter()
            .map(|(domain, addrs)| {
                let addrs = addrs
                    .split_whitespace()
                    .map(|a| a.parse().unwrap())
                    .collect();
                (domain.to_string(), addrs)
            })
            .collect();
        Self {
            answers,
            on_lookup: None,
        }
    }

    /// Run `hook` on every lookup.
    pub fn on_lookup(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_lookup = Some(Box::new(hook));
        self
    }
}

impl HostLookup for StaticLookup {
    fn lookup_ipv4(&self, domain: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        if let Some(hook) = &self.on_lookup {
            hook();
        }
        self.answers
            .get(domain)
            .cloned()
            .ok_or(LookupError::NoSuchName)
    }
}

pub fn settings(domains: &[&str]) -> Settings {
    Settings {
        table: "filter".to_string(),
        chain: "FORWARD".to_string(),
        blocklist_set: "blk".to_string(),
        domains: domains.iter().map(|d| d.to_string()).collect(),
        whitelist: vec!["192.168.1.10".parse().unwrap()],
        poll_interval: Duration::from_secs(3600),
        rule_position: 0,
        pidfile: PathBuf::from("/run/blocky.pid"),
    }
}
