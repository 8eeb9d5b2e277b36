//! HTTP front end
//!
//! Serves the homepage from the static directory and answers every
//! `/{provider}[/{line_or_version}[/{version}]]` path with a 301 or a 404.

mod routes;
mod server;

pub use routes::FORWARDED_FOR;
pub use server::{AppState, WebServer};
