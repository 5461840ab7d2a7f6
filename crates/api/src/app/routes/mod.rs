use axum::{routing::get, Router};

use docflow_infra::ratelimit::RateLimiter;

pub mod analyses;
pub mod documents;
pub mod jobs;
pub mod system;

/// Router for all authenticated `/v1` endpoints.
pub fn router(limiter: RateLimiter, max_upload_bytes: u64) -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/documents", documents::router(limiter, max_upload_bytes))
        .nest("/jobs", jobs::router())
        .nest("/analyses", analyses::router())
}

/// Parse a path id, mapping failures to a 400.
pub(crate) fn parse_id<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, axum::response::Response> {
    raw.parse().map_err(|_| {
        crate::app::errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what} id"),
        )
    })
}
