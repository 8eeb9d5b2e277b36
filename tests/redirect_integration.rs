//! Integration tests for the HTTP surface
//!
//! Drives the full router: path extraction -> resolver -> autodetector -> response

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use boshstemcells::config::{CatalogConfig, ServerConfig};
use boshstemcells::detect::{Autodetector, Cloud, DetectError, ProviderCheck, SpfError};
use boshstemcells::router::{line_token, provider_token, LINE_SEGMENTS, PROVIDER_SEGMENTS};
use boshstemcells::router::StemcellResolver;
use boshstemcells::web::{WebServer, FORWARDED_FOR};
use http_body_util::BodyExt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

/// Provider check backed by a fixed address list
struct KnownAddresses {
    cloud: Cloud,
    addresses: &'static [&'static str],
}

#[async_trait]
impl ProviderCheck for KnownAddresses {
    fn cloud(&self) -> Cloud {
        self.cloud
    }

    async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError> {
        Ok(self.addresses.iter().any(|a| a.parse::<IpAddr>().ok() == Some(ip)))
    }
}

/// GCP check whose SPF record is broken for one address
struct BrokenSpf;

#[async_trait]
impl ProviderCheck for BrokenSpf {
    fn cloud(&self) -> Cloud {
        Cloud::Gcp
    }

    async fn matches(&self, ip: IpAddr) -> Result<bool, DetectError> {
        if ip.to_string() == "198.51.100.1" {
            return Err(SpfError::PermError("multiple SPF records".to_string()).into());
        }
        Ok(false)
    }
}

fn app() -> Router {
    let checks: Vec<Box<dyn ProviderCheck>> = vec![
        Box::new(BrokenSpf),
        Box::new(KnownAddresses {
            cloud: Cloud::Gcp,
            addresses: &["35.203.192.88"],
        }),
        Box::new(KnownAddresses {
            cloud: Cloud::Aws,
            addresses: &["52.210.132.254", "198.51.100.1"],
        }),
        Box::new(KnownAddresses {
            cloud: Cloud::Azure,
            addresses: &["52.164.240.179"],
        }),
    ];
    let detector = Autodetector::new(checks);
    let resolver = StemcellResolver::new(CatalogConfig::default(), Arc::new(detector));
    let config = ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        static_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static"),
    };

    WebServer::new(config, resolver).router()
}

async fn get(path: &str, forwarded_for: Option<&str>) -> (StatusCode, Option<String>, String) {
    let mut request = Request::builder().uri(path);
    if let Some(value) = forwarded_for {
        request = request.header(FORWARDED_FOR, value);
    }

    let response = app()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes();

    (status, location, String::from_utf8(body.to_vec()).unwrap())
}

fn stemcell_url(provider: &str, line: &str) -> String {
    format!(
        "https://bosh.io/d/stemcells/bosh-{}-{}-go_agent",
        provider, line
    )
}

#[tokio::test]
async fn test_homepage() {
    let (status, _, body) = get("/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<h1>BoshStemcells.com</h1>"));
}

#[tokio::test]
async fn test_stylesheet_is_not_a_provider() {
    let (status, location, body) = get("/bootstrap.min.css", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(location, None);
    assert!(body.contains(".container"));
}

#[tokio::test]
async fn test_every_iaas_redirects() {
    let expected = [
        ("gcp", "google-kvm"),
        ("vsphere", "vsphere-esxi"),
        ("aws", "aws-xen-hvm"),
        ("azure", "azure-hyperv"),
        ("openstack", "openstack-kvm"),
        ("softlayer", "softlayer-xen"),
        ("vcloud", "vcloud-esxi"),
        ("lite", "warden-boshlite"),
    ];

    for (segment, token) in expected {
        let (status, location, _) = get(&format!("/{}", segment), None).await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY, "/{segment}");
        assert_eq!(location, Some(stemcell_url(token, "ubuntu-xenial")));
    }

    for segment in PROVIDER_SEGMENTS {
        let (status, location, _) = get(&format!("/{}", segment), None).await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY, "/{segment}");
        assert_eq!(
            location,
            Some(stemcell_url(provider_token(segment).unwrap(), "ubuntu-xenial"))
        );
    }
}

#[tokio::test]
async fn test_redirects_to_versions() {
    let (status, location, _) = get("/gcp/1234.56", None).await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        location.as_deref(),
        Some("https://bosh.io/d/stemcells/bosh-google-kvm-ubuntu-xenial-go_agent?v=1234.56")
    );
}

#[tokio::test]
async fn test_line_as_second_segment() {
    for segment in LINE_SEGMENTS {
        let (status, location, _) = get(&format!("/aws/{}", segment), None).await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY, "/aws/{segment}");
        assert_eq!(
            location,
            Some(stemcell_url("aws-xen-hvm", line_token(segment).unwrap()))
        );
    }
}

#[tokio::test]
async fn test_line_and_version() {
    let (status, location, _) = get("/aws/trusty/1234.56", None).await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        location.as_deref(),
        Some("https://bosh.io/d/stemcells/bosh-aws-xen-hvm-ubuntu-trusty-go_agent?v=1234.56")
    );
}

#[tokio::test]
async fn test_latest_is_the_same_as_no_version() {
    let (_, bare, _) = get("/openstack", None).await;
    let (status, latest, _) = get("/openstack/latest", None).await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(bare, latest);
}

#[tokio::test]
async fn test_autodetects() {
    let cases = [
        ("35.203.192.88", "google-kvm"),
        ("52.210.132.254", "aws-xen-hvm"),
        ("52.164.240.179", "azure-hyperv"),
        ("35.203.192.88, 10.0.0.1", "google-kvm"),
    ];

    for (forwarded_for, token) in cases {
        let (status, location, _) = get("/auto", Some(forwarded_for)).await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY, "{forwarded_for}");
        assert_eq!(location, Some(stemcell_url(token, "ubuntu-xenial")));
    }
}

#[tokio::test]
async fn test_autodetect_keeps_line_and_version() {
    let (status, location, _) = get("/auto/windows2016/1200.3", Some("52.164.240.179")).await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        location.as_deref(),
        Some("https://bosh.io/d/stemcells/bosh-azure-hyperv-windows2016-go_agent?v=1200.3")
    );
}

#[tokio::test]
async fn test_autodetect_failure() {
    for forwarded_for in [None, Some("192.0.2.44"), Some("not-an-address")] {
        let (status, location, body) = get("/auto", forwarded_for).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(location, None);
        assert_eq!(body, "could not autodetect IaaS");
    }
}

#[tokio::test]
async fn test_spf_error_aborts_autodetection() {
    // The AWS check would claim this address, but the SPF failure comes first
    let (status, _, body) = get("/auto", Some("198.51.100.1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "could not autodetect IaaS");
}

#[tokio::test]
async fn test_unknown_iaas() {
    let (status, location, body) = get("/unknown-provider", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(location, None);
    assert!(body.is_empty());

    let (status, _, body) = get("/digitalocean/trusty/1234.56", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_undecodable_segments_are_not_found() {
    for path in ["/%FF", "/aws/%FF", "/aws/trusty/%C3"] {
        let (status, location, body) = get(path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
        assert_eq!(location, None);
        assert!(body.is_empty(), "{path}");
    }
}
