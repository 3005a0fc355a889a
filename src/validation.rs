//! Centralized validation functions for blocky.
//!
//! This module provides unified validation for:
//! - IPv4 addresses (whitelist entries)
//! - ipset names
//! - The poll interval and rule position settings

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{BlockyError, Result};

/// Longest set name the kernel accepts (IPSET_MAXNAMELEN - 1).
pub const MAX_SET_NAME_LEN: usize = 31;

/// Validate an IPv4 address string and return the parsed address.
///
/// # Examples
/// ```
/// use blocky::validation::validate_ipv4;
/// assert!(validate_ipv4("192.168.1.1").is_ok());
/// assert!(validate_ipv4("::1").is_err());
/// assert!(validate_ipv4("invalid").is_err());
/// ```
pub fn validate_ipv4(ip_str: &str) -> Result<Ipv4Addr> {
    ip_str
        .trim()
        .parse()
        .map_err(|_| BlockyError::Config(format!("Invalid IPv4 address: {}", ip_str)))
}

/// Validate an ipset name.
///
/// # Examples
/// ```
/// use blocky::validation::validate_set_name;
/// assert!(validate_set_name("blocky_blacklist").is_ok());
/// assert!(validate_set_name("has space").is_err());
/// ```
pub fn validate_set_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BlockyError::Config("ipset name cannot be empty".to_string()));
    }
    if name.len() > MAX_SET_NAME_LEN {
        return Err(BlockyError::Config(format!(
            "ipset name '{}' is longer than {} characters",
            name, MAX_SET_NAME_LEN
        )));
    }
    if !name.is_ascii() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(BlockyError::Config(format!(
            "ipset name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}

/// Validate the `check_every` setting (seconds, strictly positive).
///
/// # Examples
/// ```
/// use blocky::validation::validate_poll_interval;
/// assert_eq!(validate_poll_interval("30").unwrap().as_secs(), 30);
/// assert!(validate_poll_interval("0").is_err());
/// assert!(validate_poll_interval("soon").is_err());
/// ```
pub fn validate_poll_interval(value: &str) -> Result<Duration> {
    match value.trim().parse::<i64>() {
        Ok(seconds) if seconds > 0 => Ok(Duration::from_secs(seconds as u64)),
        _ => Err(BlockyError::InvalidPollInterval(value.to_string())),
    }
}

/// Validate the `rule_pos` setting (non-negative integer offset into the chain).
pub fn validate_rule_position(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|position| usize::try_from(position).ok())
        .ok_or_else(|| {
            BlockyError::InvalidRulePosition(format!(
                "Incorrect rule position (rule_pos setting, set currently to: {}). Abort.",
                value
            ))
        })
}

/// Check a rule position against the number of rules already in the chain.
///
/// Inserting at `rule_count` appends; anything beyond is rejected.
pub fn validate_rule_position_bound(position: usize, rule_count: usize) -> Result<()> {
    if position > rule_count {
        return Err(BlockyError::InvalidRulePosition(format!(
            "Rule position ({}) is too high in IPTables chain (no of rules: {}). Abort.",
            position, rule_count
        )));
    }
    Ok(())
}
