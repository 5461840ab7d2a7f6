//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection and service assembly
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, AppServices, Background};

/// Build the full HTTP router around already-built services.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// rate limiter can fall back to the peer address.
pub fn build_app(services: Arc<AppServices>, jwt_secret: &str) -> Router {
    let jwt = Arc::new(docflow_auth::Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::router(services.limiter.clone(), services.config.intake.max_upload_bytes)
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/v1", protected)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
