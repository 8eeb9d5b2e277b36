//! Per-provider membership checks

use super::dns::DnsLookup;
use super::spf::{check_host, SpfResult};
use super::{Cloud, DetectError, ProviderCheck};
use async_trait::async_trait;
use reqwest::Client;
use std::net::IpAddr;
use std::sync::Arc;

/// GCP: the address is authorized by Google's cloud netblock SPF record
pub struct GcpCheck {
    dns: Arc<dyn DnsLookup>,
    spf_domain: String,
}

impl GcpCheck {
    pub fn new(dns: Arc<dyn DnsLookup>, spf_domain: impl Into<String>) -> Self {
        Self {
            dns,
            spf_domain: spf_domain.into(),
        }
    }
}

#[async_trait]
impl ProviderCheck for GcpCheck {
    fn cloud(&self) -> Cloud {
        Cloud::Gcp
    }

    async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError> {
        let result = check_host(self.dns.as_ref(), ip, &self.spf_domain).await?;
        tracing::debug!(ip = %ip, domain = %self.spf_domain, result = ?result, "SPF netblock check");
        Ok(result == SpfResult::Pass)
    }
}

/// AWS: the address reverse-resolves to an `amazonaws.com.` hostname
pub struct AwsCheck {
    dns: Arc<dyn DnsLookup>,
    hostname_marker: String,
}

impl AwsCheck {
    pub fn new(dns: Arc<dyn DnsLookup>, hostname_marker: impl Into<String>) -> Self {
        Self {
            dns,
            hostname_marker: hostname_marker.into(),
        }
    }
}

#[async_trait]
impl ProviderCheck for AwsCheck {
    fn cloud(&self) -> Cloud {
        Cloud::Aws
    }

    async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError> {
        match self.dns.reverse(ip).await {
            Ok(names) => {
                let hostname = names.first().map(String::as_str).unwrap_or_default();
                tracing::debug!(ip = %ip, hostname = %hostname, "Reverse DNS check");
                Ok(hostname.contains(&self.hostname_marker))
            }
            // Most addresses have no PTR record
            Err(e) => {
                tracing::debug!(ip = %ip, error = %e, "Reverse DNS lookup failed");
                Ok(false)
            }
        }
    }
}

/// Azure: a geolocation API reports the address as belonging to Azure
pub struct AzureCheck {
    client: Client,
    api_url: String,
}

impl AzureCheck {
    /// The client should carry the request timeout
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    async fn lookup(&self, ip: IpAddr) -> Result<String, reqwest::Error> {
        self.client
            .get(&self.api_url)
            .query(&[("ipOrUrl", ip.to_string())])
            .send()
            .await?
            .text()
            .await
    }
}

#[async_trait]
impl ProviderCheck for AzureCheck {
    fn cloud(&self) -> Cloud {
        Cloud::Azure
    }

    async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError> {
        match self.lookup(ip).await {
            Ok(body) => {
                let cloud = cloud_field(&body);
                tracing::debug!(ip = %ip, cloud = ?cloud, "Geolocation check");
                Ok(cloud.as_deref() == Some("Azure"))
            }
            Err(e) => {
                tracing::debug!(ip = %ip, error = %e, timeout = e.is_timeout(), "Geolocation lookup failed");
                Ok(false)
            }
        }
    }
}

/// The string `cloud` field of a geolocation response, if there is one
fn cloud_field(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("cloud")?.as_str().map(str::to_string)
}
