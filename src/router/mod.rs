//! Stemcell request routing
//!
//! Handles:
//! - IaaS and OS-line alias normalization
//! - Path segment interpretation (line vs. version, `latest`)
//! - Rendering the catalog redirect URL

mod aliases;
mod resolver;

pub use aliases::{
    line_token, provider_token, AUTO_PROVIDER, LATEST_VERSION, LINE_SEGMENTS, PROVIDER_SEGMENTS,
};
pub use resolver::{RedirectTarget, ResolveError, StemcellPath, StemcellResolver};
