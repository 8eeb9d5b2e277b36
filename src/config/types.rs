//! Raw configuration types for TOML parsing

use super::*;
use crate::router::line_token;
use reqwest::Url;
use serde::Deserialize;

/// Raw configuration as parsed from TOML
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub server: Option<RawServerConfig>,
    pub catalog: Option<RawCatalogConfig>,
    pub detect: Option<RawDetectConfig>,
    pub logging: Option<RawLoggingConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawServerConfig {
    pub bind: Option<String>,
    pub static_dir: Option<String>,
}

impl From<RawServerConfig> for ServerConfig {
    fn from(raw: RawServerConfig) -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind: raw.bind.unwrap_or(defaults.bind),
            static_dir: raw.static_dir.map(PathBuf::from).unwrap_or(defaults.static_dir),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawCatalogConfig {
    pub base_url: Option<String>,
    pub default_line: Option<String>,
}

impl TryFrom<RawCatalogConfig> for CatalogConfig {
    type Error = ConfigError;

    fn try_from(raw: RawCatalogConfig) -> Result<Self, Self::Error> {
        let mut base = raw
            .base_url
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ConfigError::Invalid(format!("catalog.base_url {}: {}", base, e)))?
            .to_string();

        let default_line = match raw.default_line.as_deref() {
            None => DEFAULT_LINE,
            Some(line) => line_token(line).ok_or_else(|| {
                ConfigError::Invalid(format!("Unknown catalog.default_line: {}", line))
            })?,
        };

        Ok(Self {
            base_url,
            default_line,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawDetectConfig {
    pub spf_domain: Option<String>,
    pub aws_hostname_marker: Option<String>,
    pub azure_api_url: Option<String>,
    pub azure_timeout_ms: Option<u64>,
}

impl TryFrom<RawDetectConfig> for DetectConfig {
    type Error = ConfigError;

    fn try_from(raw: RawDetectConfig) -> Result<Self, Self::Error> {
        let azure_timeout = match raw.azure_timeout_ms {
            None => DEFAULT_AZURE_TIMEOUT,
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "detect.azure_timeout_ms must be greater than zero".to_string(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
        };

        let azure_api_url = raw
            .azure_api_url
            .unwrap_or_else(|| DEFAULT_AZURE_API_URL.to_string());
        Url::parse(&azure_api_url).map_err(|e| {
            ConfigError::Invalid(format!("detect.azure_api_url {}: {}", azure_api_url, e))
        })?;

        Ok(Self {
            spf_domain: raw
                .spf_domain
                .unwrap_or_else(|| DEFAULT_SPF_DOMAIN.to_string()),
            aws_hostname_marker: raw
                .aws_hostname_marker
                .unwrap_or_else(|| DEFAULT_AWS_HOSTNAME_MARKER.to_string()),
            azure_api_url,
            azure_timeout,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl TryFrom<RawLoggingConfig> for LoggingConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLoggingConfig) -> Result<Self, Self::Error> {
        let format = match raw.format.as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown logging.format: {} (expected \"pretty\" or \"json\")",
                    other
                )))
            }
        };

        Ok(Self {
            level: raw.level.unwrap_or_else(|| "info".to_string()),
            format,
        })
    }
}

/// Default configuration written by `boshstemcells init`
pub const DEFAULT_CONFIG_TOML: &str = r#"# boshstemcells configuration

[server]
# Address to bind to; the PORT environment variable overrides this
bind = "0.0.0.0:8080"
# Directory holding index.html and bootstrap.min.css
static_dir = "static"

[catalog]
base_url = "https://bosh.io/d/stemcells/"
# Any OS line alias: xenial, trusty, windows2016, centos7, ...
default_line = "ubuntu-xenial"

[detect]
spf_domain = "_cloud-netblocks.googleusercontent.com"
aws_hostname_marker = "amazonaws.com."
azure_api_url = "http://www.azurespeed.com/api/region"
azure_timeout_ms = 1000

[logging]
level = "info"
# "pretty" or "json"
format = "pretty"
"#;
