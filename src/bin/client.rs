//! Chat Client - Entry Point
//!
//! Connects to a broadcast chat server, relays stdin lines as chat, and
//! sends the quit sentinel on SIGINT/SIGTERM.

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use broadcast_chat::client::validate_handle;
use broadcast_chat::config::DEFAULT_MSG_LENGTH;
use broadcast_chat::{wait_for_signal, ChatClient, ChatError};

/// Client for the broadcast chat server
#[derive(Parser, Debug)]
#[command(name = "chat_client", version, about)]
struct Args {
    /// Server host name or address
    host: String,

    /// Server port
    port: u16,

    /// Chat handle (1-10 characters, no spaces); prompted for when omitted
    #[arg(long)]
    handle: Option<String>,
}

/// Ask on stdin until the user types an acceptable handle
async fn prompt_handle<R>(input: &mut R) -> Result<String, ChatError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    loop {
        stdout
            .write_all(b"Please enter a handle (1-10 characters, no spaces): ")
            .await?;
        stdout.flush().await?;

        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            return Err(ChatError::ConnectionClosed);
        }
        if let Ok(handle) = validate_handle(&line) {
            return Ok(handle);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Chat goes to stdout, diagnostics to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("broadcast_chat=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut input = BufReader::new(tokio::io::stdin());
    let handle = match args.handle {
        Some(handle) => validate_handle(&handle)?,
        None => prompt_handle(&mut input).await?,
    };

    let addr = format!("{}:{}", args.host, args.port);
    let client = ChatClient::connect(&addr, &handle, DEFAULT_MSG_LENGTH).await?;
    println!("Connected to {}", client.server_handle());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => signal_token.cancel(),
            Err(e) => error!("Error waiting for signal: {}", e),
        }
    });

    client.run(input, tokio::io::stdout(), shutdown).await?;

    // The stdin reader parks a blocking thread that would hold the runtime open
    std::process::exit(0);
}
