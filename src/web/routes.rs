//! Route handlers

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::router::{ResolveError, StemcellPath};

use super::server::AppState;

/// Header carrying the original client address behind a proxy
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Redirect a stemcell path to its catalog URL
pub async fn redirect(
    State(state): State<AppState>,
    path: Result<Path<StemcellPath>, PathRejection>,
    headers: HeaderMap,
) -> Response {
    // Segments that do not decode to UTF-8 cannot name a stemcell
    let path = match path {
        Ok(Path(path)) => path,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Undecodable stemcell path");
            return ResolveError::UnknownProvider(rejection.body_text()).into_response();
        }
    };

    let forwarded_for = headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok());

    match state.resolver.resolve(&path, forwarded_for).await {
        Ok(target) => {
            tracing::debug!(
                provider = %target.provider,
                line = %target.line,
                version = ?target.version,
                location = %target.location,
                "Redirecting"
            );
            (
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, target.location)],
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        match self {
            ResolveError::MissingProvider | ResolveError::UnknownProvider(_) => {
                StatusCode::NOT_FOUND.into_response()
            }
            ResolveError::AutodetectFailed => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            ResolveError::InvalidTarget(message) => {
                tracing::error!(error = %message, "Failed to render redirect");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
