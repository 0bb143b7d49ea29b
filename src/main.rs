use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use turnstile::config::AppConfig;
use turnstile::http::HttpServer;
use turnstile::limiter::RateLimiter;

#[derive(Parser, Debug)]
#[command(version, about = "Sharded token-bucket request admission service")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();

    info!("Starting Turnstile Request Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration, falling back to defaults if absent
    let config = AppConfig::load_or_default(&cli.config);
    let listen_addr = cli.listen.unwrap_or(config.server.listen_addr);

    // Initialize the rate limiter engine and its janitor
    let limiter = Arc::new(RateLimiter::new(config.limiter()));
    info!("Rate limiter initialized");

    let server = HttpServer::new(listen_addr, limiter.clone());

    // Run the server with graceful shutdown on Ctrl+C or SIGTERM
    server.serve_with_shutdown(shutdown_signal()).await?;

    // Stop routing is done; now stop the janitor cleanly.
    limiter.shutdown().await;

    info!("Turnstile Request Admission Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
