//! # blocky - domain blocking with ipset and iptables
//!
//! Blocks traffic to a list of domains whose addresses change over time. The
//! domains are re-resolved every poll interval and the resulting IPv4 addresses
//! are pushed into an ipset matched by a single iptables DROP rule. A second
//! set and ACCEPT rule, inserted ahead of it, whitelist local addresses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        blocky                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: run, check, cleanup, version               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml) + Preflight                            │
//! │    └── Validated Settings                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Daemon (tokio, signals, pidfile)                           │
//! │    └── ReconciliationLoop: resolve → diff → sync → sleep    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DNS (dns-lookup)                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer                                                   │
//! │    ├── IpSet (ipset create/flush/add/destroy)               │
//! │    └── IptablesRule (comment-marked rule in one chain)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use blocky::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
//! use blocky::config::Config;
//! use blocky::daemon::LifecycleController;
//! use blocky::dns::AddressResolver;
//! use blocky::fs_abstraction::real_fs;
//! use blocky::preflight::Preflight;
//! use blocky::process::LinuxProcesses;
//! use blocky::reconcile::ReconciliationLoop;
//! use blocky::signal::ShutdownToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/blocky/config.yaml")?;
//!     let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor::new());
//!     let settings = Preflight::new(&config, executor.clone(), real_fs(), &LinuxProcesses).run()?;
//!
//!     let engine = ReconciliationLoop::new(settings, executor, AddressResolver::system());
//!     LifecycleController::new(engine, ShutdownToken::new()).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - External command execution (mockable)
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`daemon`] - Lifecycle around the reconciliation loop
//! - [`dns`] - Domain to IPv4 resolution
//! - [`enforcer`] - ipset and iptables management
//! - [`error`] - Error type and exit codes
//! - [`fs_abstraction`] - File access (mockable)
//! - [`logging`] - Console, file and syslog sinks
//! - [`pidfile`] - Locked pidfile
//! - [`preflight`] - Startup checks
//! - [`process`] - Process inspection for pidfile takeover
//! - [`reconcile`] - The poll/diff/sync engine
//! - [`signal`] - Graceful shutdown signal handling
//! - [`validation`] - Input validation

pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod dns;
pub mod enforcer;
pub mod error;
pub mod fs_abstraction;
pub mod logging;
pub mod pidfile;
pub mod preflight;
pub mod process;
pub mod reconcile;
pub mod signal;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::{Config, Settings};
pub use error::{BlockyError, Result};
