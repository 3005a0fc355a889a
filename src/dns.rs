//! DNS resolution for the blocked domains.
//!
//! Every poll cycle re-resolves all domains; nothing is cached between calls.
//! A domain that fails to resolve contributes no addresses but never aborts the
//! resolution of the others.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

/// Why a single domain produced no addresses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The name does not exist (NXDOMAIN)
    #[error("name does not exist")]
    NoSuchName,
    /// The name exists but has no IPv4 address
    #[error("no IPv4 address")]
    NoAddress,
    /// Anything else (network trouble, resolver misconfiguration, ...)
    #[error("{0}")]
    Failed(String),
}

/// Forward lookup of one name to IPv4 addresses.
#[cfg_attr(test, automock)]
pub trait HostLookup: Send + Sync {
    fn lookup_ipv4(&self, domain: &str) -> Result<Vec<Ipv4Addr>, LookupError>;
}

/// `getaddrinfo(3)` based lookup, honouring the system resolver configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn lookup_ipv4(&self, domain: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        use dns_lookup::{getaddrinfo, AddrInfoHints, LookupErrorKind};

        let hints = AddrInfoHints {
            socktype: libc::SOCK_STREAM,
            address: libc::AF_INET,
            ..AddrInfoHints::default()
        };

        let entries = getaddrinfo(Some(domain), None, Some(hints)).map_err(|e| match e.kind() {
            LookupErrorKind::NoName => LookupError::NoSuchName,
            LookupErrorKind::NoData => LookupError::NoAddress,
            _ => LookupError::Failed(std::io::Error::from(e).to_string()),
        })?;

        let mut addresses = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LookupError::Failed(e.to_string()))?;
            if let IpAddr::V4(v4) = entry.sockaddr.ip() {
                addresses.push(v4);
            }
        }
        Ok(addresses)
    }
}

/// Resolves a domain list to a sorted, deduplicated address list.
#[derive(Clone)]
pub struct AddressResolver {
    lookup: Arc<dyn HostLookup>,
}

impl AddressResolver {
    pub fn new(lookup: Arc<dyn HostLookup>) -> Self {
        Self { lookup }
    }

    /// Resolver backed by the system resolver.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemLookup))
    }

    /// Resolve every domain, one after the other.
    ///
    /// Lookups block, so each one runs on tokio's blocking pool.
    pub async fn resolve(&self, domains: &[String]) -> Vec<Ipv4Addr> {
        debug!("FQDNs: {}", domains.join(", "));
        let mut addresses = BTreeSet::new();

        for domain in domains {
            let lookup = Arc::clone(&self.lookup);
            let name = domain.clone();
            match tokio::task::spawn_blocking(move || lookup.lookup_ipv4(&name)).await {
                Ok(Ok(found)) => {
                    debug!("{} resolved to {} address(es)", domain, found.len());
                    addresses.extend(found);
                }
                Ok(Err(LookupError::NoSuchName)) => debug!("{} does not exist", domain),
                Ok(Err(LookupError::NoAddress)) => debug!("{} has no IPv4 address", domain),
                Ok(Err(LookupError::Failed(reason))) => {
                    warn!("Failed to resolve {}: {}", domain, reason)
                }
                Err(e) => warn!("DNS lookup task for {} failed: {}", domain, e),
            }
        }

        addresses.into_iter().collect()
    }
}
