//! Cloud provider autodetection from a client IP address
//!
//! Checks run strictly in order and stop at the first match:
//! - GCP: SPF netblock membership
//! - AWS: reverse DNS hostname
//! - Azure: geolocation API
//!
//! Only an SPF permerror/temperror aborts the chain. Failed reverse lookups
//! and failed geolocation calls count as "not this provider".

mod checks;
pub mod dns;
pub mod spf;

pub use checks::{AwsCheck, AzureCheck, GcpCheck};
pub use dns::{DnsError, DnsLookup, HickoryDns};
pub use spf::{SpfError, SpfResult};

use crate::config::DetectConfig;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// Autodetection errors
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("SPF verification failed: {0}")]
    Spf(#[from] SpfError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A provider the autodetector can recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cloud {
    Gcp,
    Aws,
    Azure,
}

impl Cloud {
    /// The provider path segment this cloud resolves through
    pub fn as_str(&self) -> &'static str {
        match self {
            Cloud::Gcp => "gcp",
            Cloud::Aws => "aws",
            Cloud::Azure => "azure",
        }
    }
}

impl std::fmt::Display for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single "does this address belong to provider X" probe
#[async_trait]
pub trait ProviderCheck: Send + Sync {
    /// The provider a positive answer identifies
    fn cloud(&self) -> Cloud;

    /// Whether the address belongs to this provider.
    ///
    /// Expected negative outcomes are `Ok(false)`; an `Err` aborts detection.
    async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError>;
}

/// Ordered pipeline of provider checks
pub struct Autodetector {
    checks: Vec<Box<dyn ProviderCheck>>,
}

impl Autodetector {
    /// Create an autodetector from checks, tried in the given order
    pub fn new(checks: Vec<Box<dyn ProviderCheck>>) -> Self {
        Self { checks }
    }

    /// The standard GCP → AWS → Azure chain against live DNS and HTTP
    pub fn from_config(config: &DetectConfig) -> Result<Self, DetectError> {
        let dns: Arc<dyn DnsLookup> = Arc::new(HickoryDns::from_system_conf());
        let client = reqwest::Client::builder()
            .user_agent(concat!("boshstemcells/", env!("CARGO_PKG_VERSION")))
            .timeout(config.azure_timeout)
            .build()?;

        let checks: Vec<Box<dyn ProviderCheck>> = vec![
            Box::new(GcpCheck::new(dns.clone(), config.spf_domain.clone())),
            Box::new(AwsCheck::new(dns, config.aws_hostname_marker.clone())),
            Box::new(AzureCheck::new(client, config.azure_api_url.clone())),
        ];

        Ok(Self::new(checks))
    }

    /// Run the checks in order; `Ok(None)` when no provider claims the address
    pub async fn detect(&self, ip: IpAddr) -> Result<Option<Cloud>, DetectError> {
        for check in &self.checks {
            let cloud = check.cloud();
            if check.matches(ip).await? {
                tracing::info!(ip = %ip, cloud = %cloud, "Autodetected IaaS");
                return Ok(Some(cloud));
            }
            tracing::debug!(ip = %ip, cloud = %cloud, "Address does not belong to provider");
        }

        Ok(None)
    }
}

/// The client address from an `X-Forwarded-For` value: its first entry
pub fn client_ip(forwarded_for: &str) -> Option<IpAddr> {
    forwarded_for.split(',').next()?.trim().parse().ok()
}
