//! Error types for blocky.
//!
//! Every fatal condition has its own variant and its own process exit code, so a
//! service manager (or a human reading `systemctl status`) can tell them apart.

use thiserror::Error;

/// Result alias used by the library modules.
pub type Result<T> = std::result::Result<T, BlockyError>;

/// Broad category of a [`BlockyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed configuration (including logging settings)
    Configuration,
    /// A value is out of its allowed range
    Validation,
    /// The configured table or chain does not exist
    ResourceNotFound,
    /// ipset/iptables failed or is unavailable
    ExternalTool,
    /// Another process is in the way
    Conflict,
    /// Not enough privilege to touch the firewall
    Permission,
    /// Local file handling failed
    Io,
}

#[derive(Error, Debug)]
pub enum BlockyError {
    #[error("Config file not found or unreadable: {0}")]
    ConfigMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Chain {chain} not found in table {table}")]
    ChainNotFound { table: String, chain: String },

    #[error("ipset problem: {0}")]
    IpSet(String),

    #[error("iptables problem: {0}")]
    Iptables(String),

    #[error("Incorrect check_every setting ({0}) in config file. Abort.")]
    InvalidPollInterval(String),

    #[error("Incorrect log_type setting ({0}) in config file. Abort.")]
    InvalidLogType(String),

    #[error("Incorrect log_level setting ({0}) in config file. Abort.")]
    InvalidLogLevel(String),

    #[error("Incorrect log_facility setting ({0}) in config file. Abort.")]
    InvalidLogFacility(String),

    #[error("Log type is set to file, but log_path setting ({0:?}) is empty. Abort.")]
    LogPathUnset(String),

    #[error("{0}")]
    InvalidRulePosition(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Command {command} is missing or otherwise unavailable: {detail}")]
    ToolUnavailable { command: String, detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BlockyError {
    /// Process exit code for this error. Stable across releases.
    pub fn exit_code(&self) -> u8 {
        match self {
            BlockyError::ConfigMissing(_) => 2,
            BlockyError::TableNotFound(_) => 3,
            BlockyError::ChainNotFound { .. } => 4,
            BlockyError::IpSet(_) => 5,
            BlockyError::InvalidPollInterval(_) => 6,
            BlockyError::InvalidLogType(_) => 7,
            BlockyError::InvalidLogLevel(_) => 8,
            BlockyError::InvalidLogFacility(_) => 9,
            BlockyError::LogPathUnset(_) => 10,
            BlockyError::InvalidRulePosition(_) => 11,
            BlockyError::Conflict(_) => 12,
            BlockyError::Permission(_) => 13,
            BlockyError::ToolUnavailable { .. } => 14,
            BlockyError::Iptables(_) => 15,
            BlockyError::Config(_) => 16,
            BlockyError::Io { .. } => 17,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockyError::ConfigMissing(_)
            | BlockyError::Config(_)
            | BlockyError::InvalidLogType(_)
            | BlockyError::InvalidLogLevel(_)
            | BlockyError::InvalidLogFacility(_)
            | BlockyError::LogPathUnset(_) => ErrorKind::Configuration,
            BlockyError::InvalidPollInterval(_) | BlockyError::InvalidRulePosition(_) => {
                ErrorKind::Validation
            }
            BlockyError::TableNotFound(_) | BlockyError::ChainNotFound { .. } => {
                ErrorKind::ResourceNotFound
            }
            BlockyError::IpSet(_)
            | BlockyError::Iptables(_)
            | BlockyError::ToolUnavailable { .. } => ErrorKind::ExternalTool,
            BlockyError::Conflict(_) => ErrorKind::Conflict,
            BlockyError::Permission(_) => ErrorKind::Permission,
            BlockyError::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BlockyError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Exit code for an error that escaped to `main`.
///
/// Errors that are not a [`BlockyError`] (anywhere in the chain) map to 1.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BlockyError>())
        .map(BlockyError::exit_code)
        .unwrap_or(1)
}
