//! DNS lookups used by the provider checks

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use thiserror::Error;

/// DNS lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// The name exists but has no records of the requested type, or does not exist
    #[error("No records found for {0}")]
    NotFound(String),

    /// The resolver could not complete the query
    #[error("DNS lookup failed for {name}: {message}")]
    Failed { name: String, message: String },
}

impl DnsError {
    fn from_resolve(name: impl Into<String>, err: ResolveError) -> Self {
        let name = name.into();
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound(name),
            _ => DnsError::Failed {
                name,
                message: err.to_string(),
            },
        }
    }
}

/// The record lookups the autodetector depends on
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// TXT records for a name, each record's strings concatenated
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError>;

    /// A and AAAA records for a name
    async fn ips(&self, name: &str) -> Result<Vec<IpAddr>, DnsError>;

    /// MX exchange hosts for a name
    async fn mx(&self, name: &str) -> Result<Vec<String>, DnsError>;

    /// PTR names for an address, fully qualified with a trailing dot
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;
}

/// DNS lookups backed by the system resolver configuration
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    /// Build a resolver from `/etc/resolv.conf` (or the platform equivalent),
    /// falling back to the library defaults when it cannot be read
    pub fn from_system_conf() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read system DNS configuration, using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };

        Self { resolver }
    }
}

#[async_trait]
impl DnsLookup for HickoryDns {
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .resolver
            .txt_lookup(fqdn(name))
            .await
            .map_err(|e| DnsError::from_resolve(name, e))?;

        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect())
    }

    async fn ips(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self
            .resolver
            .lookup_ip(fqdn(name))
            .await
            .map_err(|e| DnsError::from_resolve(name, e))?;

        Ok(lookup.iter().collect())
    }

    async fn mx(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .resolver
            .mx_lookup(fqdn(name))
            .await
            .map_err(|e| DnsError::from_resolve(name, e))?;

        Ok(lookup.iter().map(|mx| mx.exchange().to_string()).collect())
    }

    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| DnsError::from_resolve(ip.to_string(), e))?;

        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }
}

/// Queries are absolute so the resolver never appends search domains
fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}
