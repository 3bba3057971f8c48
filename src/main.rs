//! Chat Relay Server
//!
//! Real-time broadcast relay for a single chat room. Clients connect over
//! WebSocket, pick a display name and exchange short messages that every
//! connected client sees.

mod config;
mod relay;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::RelayConfig;
use server::WebSocketServer;

/// Chat Relay Server
///
/// WebSocket broadcast relay for a shared chat room
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Path to the TOML config file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.as_str())),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Chat Relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::load(&args.config)?
        .with_bind(args.bind)
        .with_port(args.port);

    if !config.allowed_origins.is_empty() {
        info!("Origin allow-list: {:?}", config.allowed_origins);
    }

    let server = Arc::new(WebSocketServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
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
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
