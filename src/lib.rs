//! boshstemcells - short URLs for BOSH stemcells
//!
//! Maps paths such as `/aws`, `/gcp/1234.56` or `/vsphere/trusty/latest` to
//! the canonical stemcell download URL on bosh.io. The reserved `/auto` path
//! picks the IaaS by inspecting the caller's address.

pub mod config;
pub mod detect;
pub mod router;
pub mod web;

use thiserror::Error;

/// Core error types for boshstemcells
#[derive(Error, Debug)]
pub enum StemcellError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Autodetection error: {0}")]
    Detect(#[from] detect::DetectError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] router::ResolveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
