//! Broadcast Chat Server - Entry Point
//!
//! Binds the listener, relays stdin to every client, and shuts down on
//! SIGINT/SIGTERM.

use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use broadcast_chat::{wait_for_signal, ChatServer, ServerConfig};

/// Multi-client TCP broadcast chat server
#[derive(Parser, Debug)]
#[command(name = "broadcast_chat", version, about)]
struct Args {
    /// Port to listen on
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=broadcast_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("broadcast_chat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let shutdown = CancellationToken::new();
    let server = ChatServer::bind(ServerConfig::new(args.port), shutdown.clone()).await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => signal_token.cancel(),
            Err(e) => error!("Error waiting for shutdown signal: {}", e),
        }
    });

    server.run(BufReader::new(tokio::io::stdin())).await?;

    // The stdin reader parks a blocking thread that would hold the runtime open
    info!("Exiting");
    std::process::exit(0);
}
