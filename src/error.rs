//! Error types for the chat server
//!
//! Defines server-level errors and per-member delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Server-level errors
///
/// `Bind` is fatal at startup. Everything else is scoped to a single
/// connection and only ever tears that connection down.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Could not bind the listening address (fatal)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Client could not reach the server
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error on a single connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No bytes arrived within the idle timeout
    #[error("connection idle timeout")]
    Timeout,

    /// Peer closed the stream
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Peer answered the handshake with the wrong token
    #[error("handshake mismatch: expected {expected:?}, received {received:?}")]
    HandshakeMismatch { expected: String, received: String },

    /// Peer sent an empty display name
    #[error("empty display name")]
    EmptyHandle,

    /// Client handle is empty, too long, or contains whitespace
    #[error("invalid handle {0:?}: use 1-10 characters, no spaces")]
    InvalidHandle(String),

    /// Connection lifecycle was driven out of order
    #[error("invalid connection transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Registry actor has shut down
    #[error("registry closed")]
    RegistryClosed,
}

/// Member delivery errors
///
/// Occurs when a fan-out message cannot be queued for one member.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The member's outbound queue is full (slow peer)
    #[error("Queue full")]
    QueueFull,

    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
