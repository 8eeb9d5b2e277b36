//! Resolution of request paths to stemcell download URLs

use super::aliases::{line_token, provider_token, AUTO_PROVIDER, LATEST_VERSION};
use crate::config::CatalogConfig;
use crate::detect::{client_ip, Autodetector};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Resolution failures, each of which maps to a fixed HTTP response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No IaaS given")]
    MissingProvider,

    #[error("Unknown IaaS: {0}")]
    UnknownProvider(String),

    #[error("could not autodetect IaaS")]
    AutodetectFailed,

    #[error("Failed to build redirect URL: {0}")]
    InvalidTarget(String),
}

/// The up-to-three path segments of a stemcell request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StemcellPath {
    #[serde(default)]
    pub provider: Option<String>,
    /// An OS line alias, or a version when it is not one
    #[serde(default)]
    pub line_or_version: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl StemcellPath {
    /// Split a request path such as `/aws/trusty/3468.1` into segments
    pub fn parse(path: &str) -> Self {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            provider: segments.next(),
            line_or_version: segments.next(),
            version: segments.next(),
        }
    }
}

/// A resolved stemcell and the catalog URL it redirects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Canonical `<iaas>-<hypervisor>` token
    pub provider: &'static str,
    /// Canonical OS line token
    pub line: &'static str,
    /// Explicit version, `None` for the latest
    pub version: Option<String>,
    /// Rendered catalog URL
    pub location: String,
}

/// Resolves stemcell paths, autodetecting the IaaS for `auto`
pub struct StemcellResolver {
    catalog: CatalogConfig,
    detector: Arc<Autodetector>,
}

impl StemcellResolver {
    /// Create a new resolver
    pub fn new(catalog: CatalogConfig, detector: Arc<Autodetector>) -> Self {
        Self { catalog, detector }
    }

    /// Resolve a request path.
    ///
    /// `forwarded_for` is the raw `X-Forwarded-For` header and is only
    /// consulted when the provider segment is `auto`.
    pub async fn resolve(
        &self,
        path: &StemcellPath,
        forwarded_for: Option<&str>,
    ) -> Result<RedirectTarget, ResolveError> {
        let segment = path
            .provider
            .as_deref()
            .ok_or(ResolveError::MissingProvider)?;

        let provider = if segment == AUTO_PROVIDER {
            self.autodetect(forwarded_for).await?
        } else {
            segment
        };

        self.target(provider, path)
    }

    /// Resolve with an explicit provider segment, no network access
    pub fn target(
        &self,
        provider: &str,
        path: &StemcellPath,
    ) -> Result<RedirectTarget, ResolveError> {
        let provider = provider_token(provider)
            .ok_or_else(|| ResolveError::UnknownProvider(provider.to_string()))?;

        let mut line = self.catalog.default_line;
        let mut version = None;

        if let Some(segment) = path.line_or_version.as_deref() {
            match line_token(segment) {
                Some(token) => line = token,
                None => version = explicit_version(segment),
            }
        }

        if let Some(segment) = path.version.as_deref() {
            version = explicit_version(segment);
        }

        let location = self.render(provider, line, version.as_deref())?;

        Ok(RedirectTarget {
            provider,
            line,
            version,
            location,
        })
    }

    async fn autodetect(&self, forwarded_for: Option<&str>) -> Result<&'static str, ResolveError> {
        let Some(ip) = forwarded_for.and_then(client_ip) else {
            tracing::debug!(forwarded_for = ?forwarded_for, "No client address to autodetect from");
            return Err(ResolveError::AutodetectFailed);
        };

        match self.detector.detect(ip).await {
            Ok(Some(cloud)) => Ok(cloud.as_str()),
            Ok(None) => {
                tracing::info!(ip = %ip, "Could not autodetect IaaS");
                Err(ResolveError::AutodetectFailed)
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Autodetection aborted");
                Err(ResolveError::AutodetectFailed)
            }
        }
    }

    fn render(
        &self,
        provider: &str,
        line: &str,
        version: Option<&str>,
    ) -> Result<String, ResolveError> {
        let name = format!("bosh-{}-{}-go_agent", provider, line);
        let mut url = Url::parse(&self.catalog.base_url)
            .and_then(|base| base.join(&name))
            .map_err(|e| ResolveError::InvalidTarget(e.to_string()))?;

        if let Some(version) = version {
            url.query_pairs_mut().append_pair("v", version);
        }

        Ok(url.into())
    }
}

/// `latest` means "no version parameter"
fn explicit_version(segment: &str) -> Option<String> {
    (segment != LATEST_VERSION).then(|| segment.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Cloud, DetectError, ProviderCheck};
    use crate::router::PROVIDER_SEGMENTS;
    use async_trait::async_trait;
    use std::net::IpAddr;

    /// Claims exactly one address for one cloud
    struct OneAddress {
        cloud: Cloud,
        ip: &'static str,
    }

    #[async_trait]
    impl ProviderCheck for OneAddress {
        fn cloud(&self) -> Cloud {
            self.cloud
        }

        async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError> {
            Ok(ip.to_string() == self.ip)
        }
    }

    fn resolver() -> StemcellResolver {
        let checks: Vec<Box<dyn ProviderCheck>> = vec![
            Box::new(OneAddress {
                cloud: Cloud::Gcp,
                ip: "35.203.192.88",
            }),
            Box::new(OneAddress {
                cloud: Cloud::Aws,
                ip: "52.210.132.254",
            }),
            Box::new(OneAddress {
                cloud: Cloud::Azure,
                ip: "52.164.240.179",
            }),
        ];
        StemcellResolver::new(CatalogConfig::default(), Arc::new(Autodetector::new(checks)))
    }

    async fn location(path: &str) -> String {
        resolver()
            .resolve(&StemcellPath::parse(path), None)
            .await
            .unwrap()
            .location
    }

    #[tokio::test]
    async fn test_provider_only() {
        assert_eq!(
            location("/gcp").await,
            "https://bosh.io/d/stemcells/bosh-google-kvm-ubuntu-xenial-go_agent"
        );
    }

    #[tokio::test]
    async fn test_every_provider_uses_default_line() {
        for segment in PROVIDER_SEGMENTS {
            let target = resolver()
                .resolve(&StemcellPath::parse(segment), None)
                .await
                .unwrap();
            assert_eq!(Some(target.provider), provider_token(segment));
            assert_eq!(target.line, "ubuntu-xenial");
            assert_eq!(target.version, None);
        }
    }

    #[tokio::test]
    async fn test_version_as_second_segment() {
        assert_eq!(
            location("/gcp/1234.56").await,
            "https://bosh.io/d/stemcells/bosh-google-kvm-ubuntu-xenial-go_agent?v=1234.56"
        );
    }

    #[tokio::test]
    async fn test_line_as_second_segment() {
        assert_eq!(
            location("/aws/trusty").await,
            "https://bosh.io/d/stemcells/bosh-aws-xen-hvm-ubuntu-trusty-go_agent"
        );
        assert_eq!(
            location("/aws/windows12").await,
            "https://bosh.io/d/stemcells/bosh-aws-xen-hvm-windows2012R2-go_agent"
        );
    }

    #[tokio::test]
    async fn test_line_and_version() {
        assert_eq!(
            location("/aws/trusty/1234.56").await,
            "https://bosh.io/d/stemcells/bosh-aws-xen-hvm-ubuntu-trusty-go_agent?v=1234.56"
        );
    }

    #[tokio::test]
    async fn test_latest_means_no_version() {
        assert_eq!(location("/vsphere/latest").await, location("/vsphere").await);
        assert_eq!(
            location("/vsphere/centos/latest").await,
            "https://bosh.io/d/stemcells/bosh-vsphere-esxi-centos-7-go_agent"
        );
    }

    #[tokio::test]
    async fn test_third_segment_overrides_version() {
        assert_eq!(
            location("/azure/3421.11/3468.1").await,
            "https://bosh.io/d/stemcells/bosh-azure-hyperv-ubuntu-xenial-go_agent?v=3468.1"
        );
        assert_eq!(
            location("/azure/3421.11/latest").await,
            "https://bosh.io/d/stemcells/bosh-azure-hyperv-ubuntu-xenial-go_agent"
        );
    }

    #[tokio::test]
    async fn test_version_is_query_encoded() {
        assert_eq!(
            location("/lite/1.0&x=y").await,
            "https://bosh.io/d/stemcells/bosh-warden-boshlite-ubuntu-xenial-go_agent?v=1.0%26x%3Dy"
        );
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let err = resolver()
            .resolve(&StemcellPath::parse("/digitalocean"), None)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::UnknownProvider("digitalocean".to_string()));

        let err = resolver()
            .resolve(&StemcellPath::parse("/AWS"), None)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::UnknownProvider("AWS".to_string()));
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let err = resolver()
            .resolve(&StemcellPath::parse("/"), None)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::MissingProvider);
    }

    #[tokio::test]
    async fn test_auto_resolves_detected_provider() {
        let resolver = resolver();
        let path = StemcellPath::parse("/auto");

        let gcp = resolver.resolve(&path, Some("35.203.192.88")).await.unwrap();
        assert_eq!(gcp.provider, "google-kvm");

        let aws = resolver
            .resolve(&path, Some("52.210.132.254, 10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(aws.provider, "aws-xen-hvm");

        let azure = resolver
            .resolve(&StemcellPath::parse("/auto/trusty/3000"), Some("52.164.240.179"))
            .await
            .unwrap();
        assert_eq!(
            azure.location,
            "https://bosh.io/d/stemcells/bosh-azure-hyperv-ubuntu-trusty-go_agent?v=3000"
        );
    }

    #[tokio::test]
    async fn test_auto_failures() {
        let resolver = resolver();
        let path = StemcellPath::parse("/auto");

        for forwarded_for in [None, Some(""), Some("garbage"), Some("192.0.2.1")] {
            let err = resolver.resolve(&path, forwarded_for).await.unwrap_err();
            assert_eq!(err, ResolveError::AutodetectFailed);
            assert_eq!(err.to_string(), "could not autodetect IaaS");
        }
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            StemcellPath::parse("/aws/trusty/1234.56"),
            StemcellPath {
                provider: Some("aws".to_string()),
                line_or_version: Some("trusty".to_string()),
                version: Some("1234.56".to_string()),
            }
        );
        assert_eq!(StemcellPath::parse("gcp").provider.as_deref(), Some("gcp"));
        assert_eq!(StemcellPath::parse(""), StemcellPath::default());
    }

    #[test]
    fn test_unparseable_base_url() {
        let catalog = CatalogConfig {
            base_url: "not a url".to_string(),
            ..CatalogConfig::default()
        };
        let resolver = StemcellResolver::new(catalog, Arc::new(Autodetector::new(vec![])));
        let err = resolver.target("aws", &StemcellPath::parse("/aws")).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidTarget(_)));
    }

    #[test]
    fn test_custom_default_line() {
        let catalog = CatalogConfig {
            default_line: "ubuntu-trusty",
            ..CatalogConfig::default()
        };
        let resolver = StemcellResolver::new(catalog, Arc::new(Autodetector::new(vec![])));
        let target = resolver
            .target("openstack", &StemcellPath::parse("/openstack"))
            .unwrap();
        assert_eq!(
            target.location,
            "https://bosh.io/d/stemcells/bosh-openstack-kvm-ubuntu-trusty-go_agent"
        );
    }
}
