//! Admission middleware: identity extraction and rate-limit headers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::trace;

use crate::limiter::RateLimiter;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared state for the admission middleware.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    /// Configured ceiling, pre-floored for the limit header.
    limit: u64,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let limit = limiter.config().max_tokens.floor() as u64;
        Self { limiter, limit }
    }
}

/// Run the admission check for a request and stamp rate-limit
/// headers on the response.
///
/// Denials short-circuit with 429 and a `Retry-After`; admitted
/// requests continue to the inner handler and carry the limit,
/// remaining, and reset headers only.
pub async fn enforce(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&req);
    let decision = state.limiter.check(&identity);

    trace!(
        identity = %identity,
        allowed = decision.allowed,
        remaining = decision.remaining,
        "Admission check"
    );

    if !decision.allowed {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(state.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_after_secs));
        headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
        return response;
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(state.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_after_secs));
    response
}

/// Extract the client identity for rate limiting.
///
/// Prefers the first entry of `X-Forwarded-For` (the original
/// client when behind a proxy), then the peer address. The core
/// treats the identity as an opaque key; any normalization happens
/// here.
fn client_identity(req: &Request) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            let first = value.split(',').next().unwrap_or(value).trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::http::server::router;
    use axum::body::Body;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(LimiterConfig {
            max_ips: 100,
            shards: 4,
            max_tokens: 3.0,
            refill_rate: 10.0,
            token_cost: 1.0,
            expiry_timeout: Duration::from_secs(600),
            janitor_interval: Duration::from_secs(60),
        }))
    }

    fn request(ip: &str) -> Request {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn admitted_request_carries_quota_headers() {
        let app = router(test_limiter());

        let response = app.oneshot(request("1.1.1.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "3");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "2");
        assert!(headers.contains_key(&X_RATELIMIT_RESET));
        assert!(!headers.contains_key(RETRY_AFTER));
    }

    #[tokio::test]
    async fn exhausted_identity_gets_429_with_retry_after() {
        let app = router(test_limiter());

        for _ in 0..3 {
            let response = app.clone().oneshot(request("2.2.2.2")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request("2.2.2.2")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[&RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn forwarded_identities_are_limited_independently() {
        let app = router(test_limiter());

        for _ in 0..4 {
            app.clone().oneshot(request("3.3.3.3")).await.unwrap();
        }

        let response = app.oneshot(request("4.4.4.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn first_forwarded_hop_wins() {
        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "9.9.9.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&req), "9.9.9.9");
    }

    #[tokio::test]
    async fn missing_identity_falls_back_to_unknown() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_identity(&req), "unknown");
    }
}
