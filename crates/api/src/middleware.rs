use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, OriginalUri, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use docflow_auth::{require_role, JwtValidator, Role};
use docflow_infra::ratelimit::{Identity, RateLimiter};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token");
    };

    let claims = match state.jwt.validate(token, Utc::now()) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "rejected bearer token");
            return json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid or expired token");
        }
    };

    if let Err(e) = require_role(&claims.role, &Role::viewer()) {
        return json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.role));

    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Per-identity fixed-window limit on the wrapped routes.
///
/// Runs after authentication, so the principal (when present) is the identity;
/// otherwise the peer address is used.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user = req.extensions().get::<PrincipalContext>().map(|p| p.user_id());
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identity = Identity::resolve(user, ip);
    // Nested routers strip their prefix from `uri()`; key on the full path.
    let route = req
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let decision = limiter.check(&identity, &route).await;
    if !decision.allowed {
        debug!(identity = %identity, route = %route, "rate limited");
        let mut res = json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "too many requests; slow down",
        );
        if let Ok(v) = HeaderValue::from_str(&limiter.config().window.as_secs().to_string()) {
            res.headers_mut().insert(header::RETRY_AFTER, v);
        }
        return res;
    }

    let mut res = next.run(req).await;
    if let Ok(v) = HeaderValue::from_str(&decision.remaining().to_string()) {
        res.headers_mut().insert("x-ratelimit-remaining", v);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::post, Router};
    use docflow_infra::config::RateLimitConfig;
    use tower::ServiceExt;

    #[tokio::test]
    async fn nested_routes_are_limited_by_full_path() {
        let limiter = RateLimiter::in_memory(RateLimitConfig::default());
        let analyze = Router::new().route(
            "/analyze",
            post(|| async { StatusCode::ACCEPTED })
                .layer(axum::middleware::from_fn_with_state(limiter.clone(), rate_limit_middleware)),
        );
        let app = Router::new().nest("/v1", Router::new().nest("/documents", analyze));

        let res = app
            .oneshot(Request::post("/v1/documents/analyze").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        let next = limiter.check(&Identity::Unknown, "/v1/documents/analyze").await;
        assert_eq!(next.count, Some(2));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok.en"));
        assert_eq!(extract_bearer(&headers), Some("tok.en"));
    }
}
