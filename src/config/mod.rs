//! Configuration system for boshstemcells
//!
//! Loads configuration from a TOML file, then applies the `PORT`
//! environment variable on top.

mod types;

pub use types::*;

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Default catalog path the redirects point into
pub const DEFAULT_CATALOG_URL: &str = "https://bosh.io/d/stemcells/";

/// Default OS line when the path does not name one
pub const DEFAULT_LINE: &str = "ubuntu-xenial";

/// SPF record listing Google Cloud's published netblocks
pub const DEFAULT_SPF_DOMAIN: &str = "_cloud-netblocks.googleusercontent.com";

/// Substring of EC2 reverse DNS names
pub const DEFAULT_AWS_HOSTNAME_MARKER: &str = "amazonaws.com.";

/// Geolocation API used for the Azure check
pub const DEFAULT_AZURE_API_URL: &str = "http://www.azurespeed.com/api/region";

/// Request timeout for the geolocation API
pub const DEFAULT_AZURE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Redirect target configuration
    pub catalog: CatalogConfig,
    /// Autodetection configuration
    pub detect: DetectConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            server: raw.server.unwrap_or_default().into(),
            catalog: raw.catalog.unwrap_or_default().try_into()?,
            detect: raw.detect.unwrap_or_default().try_into()?,
            logging: raw.logging.unwrap_or_default().try_into()?,
        })
    }

    /// Apply environment overrides (`PORT`)
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_port(std::env::var("PORT").ok().as_deref())
    }

    /// Bind to all interfaces on `port` when one is given
    pub fn with_port(mut self, port: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a port number: {}", port)))?;
            self.server.bind = format!("0.0.0.0:{}", port);
        }
        Ok(self)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            catalog: CatalogConfig::default(),
            detect: DetectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("boshstemcells")
            .join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Directory holding the homepage and its assets
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Where redirects point
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Absolute URL, ending in `/`, the `bosh-<iaas>-<line>-go_agent` path is joined onto
    pub base_url: String,
    /// Canonical OS line used when the path names none
    pub default_line: &'static str,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_URL.to_string(),
            default_line: DEFAULT_LINE,
        }
    }
}

/// Autodetection configuration
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Domain whose SPF record lists GCP netblocks
    pub spf_domain: String,
    /// Substring identifying AWS reverse DNS names
    pub aws_hostname_marker: String,
    /// Geolocation API endpoint
    pub azure_api_url: String,
    /// Timeout for the geolocation API
    pub azure_timeout: Duration,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            spf_domain: DEFAULT_SPF_DOMAIN.to_string(),
            aws_hostname_marker: DEFAULT_AWS_HOSTNAME_MARKER.to_string(),
            azure_api_url: DEFAULT_AZURE_API_URL.to_string(),
            azure_timeout: DEFAULT_AZURE_TIMEOUT,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Format: "json" or "pretty"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format
    Json,
}
