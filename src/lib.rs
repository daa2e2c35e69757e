//! Broadcast Chat Server Library
//!
//! A multi-client TCP chatroom. One administrator process relays its
//! console lines to every client and relays each client's lines to every
//! other client.
//!
//! # Architecture
//! - `ChatServer` accepts connections under a capacity cap and supervises
//!   one receiver worker task per connection
//! - The registry is an actor: all membership changes and fan-out go
//!   through its command channel, so no locks are shared between workers
//! - A single broadcast worker relays administrator input
//! - A `CancellationToken` tree carries hard shutdown (root) and soft
//!   disconnect (per generation of clients)
//!
//! # Wire protocol
//! 1. Client sends its display name, server answers `HANDLE_RECEIVED`
//! 2. Client sends `SEND_HANDLE`, server answers with its own handle
//! 3. Free-text frames follow; `<name>> \quit` disconnects
//!
//! `ChatClient` speaks the same protocol from the other end.
//!
//! # Example
//! ```ignore
//! use tokio::io::BufReader;
//! use tokio_util::sync::CancellationToken;
//! use broadcast_chat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = CancellationToken::new();
//!     let server = ChatServer::bind(ServerConfig::new(7000), shutdown.clone())
//!         .await
//!         .unwrap();
//!     server.run(BufReader::new(tokio::io::stdin())).await.unwrap();
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod types;

// Re-export main types for convenience
pub use client::{ChatClient, ClientExit};
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState, Member};
pub use error::{ChatError, SendError};
pub use handler::handle_connection;
pub use registry::{spawn_registry, RegistryHandle};
pub use server::{ChatServer, ServerControl};
pub use shutdown::wait_for_signal;
pub use types::ConnectionId;
