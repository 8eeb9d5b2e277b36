//! Web server implementation using Axum

use crate::config::ServerConfig;
use crate::router::StemcellResolver;
use crate::StemcellError;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::routes;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<StemcellResolver>,
}

/// HTTP front end for the resolver
pub struct WebServer {
    config: ServerConfig,
    app_state: AppState,
}

impl WebServer {
    /// Create a new web server
    pub fn new(config: ServerConfig, resolver: StemcellResolver) -> Self {
        let app_state = AppState {
            resolver: Arc::new(resolver),
        };

        Self { config, app_state }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let static_dir = &self.config.static_dir;

        Router::new()
            // Homepage and its stylesheet
            .route_service("/", ServeDir::new(static_dir))
            .route_service(
                "/bootstrap.min.css",
                ServeFile::new(static_dir.join("bootstrap.min.css")),
            )
            // Stemcell redirects
            .route("/{provider}", get(routes::redirect))
            .route("/{provider}/{line_or_version}", get(routes::redirect))
            .route(
                "/{provider}/{line_or_version}/{version}",
                get(routes::redirect),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.app_state.clone())
    }

    /// Run the web server until Ctrl+C
    pub async fn run(self) -> Result<(), StemcellError> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.bind).await?;

        tracing::info!(bind = %self.config.bind, "Starting boshstemcells");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Shutting down");
        Ok(())
    }

    /// Get the bind address
    pub fn bind_address(&self) -> &str {
        &self.config.bind
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
