//! HTTP server wiring for the admission middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use tracing::{error, info};

use super::middleware::{enforce, RateLimitState};
use crate::error::Result;
use crate::limiter::RateLimiter;

/// HTTP server fronting the rate limiter engine.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The shared engine instance
    limiter: Arc<RateLimiter>,
}

/// Build the application router with the admission middleware
/// layered over every route.
pub fn router(limiter: Arc<RateLimiter>) -> Router {
    let state = RateLimitState::new(limiter);

    Router::new()
        .route("/", get(index))
        .route("/api/data", get(data))
        .layer(middleware::from_fn_with_state(state, enforce))
}

async fn index() -> &'static str {
    "Access granted\n"
}

async fn data() -> &'static str {
    "Protected data endpoint"
}

impl HttpServer {
    /// Create a new HTTP server for the given engine.
    pub fn new(addr: SocketAddr, limiter: Arc<RateLimiter>) -> Self {
        Self { addr, limiter }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when the provided
    /// signal resolves; in-flight requests are allowed to finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(self.limiter);

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;

    #[tokio::test]
    async fn server_creation() {
        let addr: SocketAddr = "127.0.0.1:18080".parse().unwrap();
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::default()));
        let _server = HttpServer::new(addr, limiter);
    }
}
