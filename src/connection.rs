//! Connection state and registry membership
//!
//! `Connection` is the worker-side lifecycle of one client link.
//! `Member` is what the registry keeps for an `Active` connection: its
//! name and the outbound queue its worker drains.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::{ChatError, SendError};
use crate::message;
use crate::types::ConnectionId;

/// Lifecycle of a client link
///
/// `Handshaking -> Active -> Closing -> Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// One client's link, owned by its receiver worker
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    display_name: Option<String>,
    state: ConnectionState,
}

impl Connection {
    /// Create a connection that has not completed its handshake
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            display_name: None,
            state: ConnectionState::Handshaking,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Display name for logs and notices
    ///
    /// Falls back to the peer address before the handshake completes.
    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None => self.peer.to_string(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Finish the handshake under `name`
    ///
    /// The name is fixed from here on.
    pub fn activate(&mut self, name: String) -> Result<(), ChatError> {
        if self.state != ConnectionState::Handshaking {
            return Err(ChatError::InvalidTransition {
                from: self.state,
                to: ConnectionState::Active,
            });
        }
        self.display_name = Some(name);
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// Mark the connection as shutting down
    pub fn begin_close(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Handshaking | ConnectionState::Active
        ) {
            self.state = ConnectionState::Closing;
        }
    }

    /// Move to `Closed`
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }

    /// The line this client sends to quit
    pub fn quit_sentinel(&self) -> Option<String> {
        self.display_name.as_deref().map(message::quit_sentinel)
    }
}

/// Registry entry for an `Active` connection
#[derive(Debug)]
pub struct Member {
    pub id: ConnectionId,
    pub name: String,
    /// Registry -> worker outbound queue
    pub sender: mpsc::Sender<String>,
}

impl Member {
    pub fn new(id: ConnectionId, name: String, sender: mpsc::Sender<String>) -> Self {
        Self { id, name, sender }
    }

    /// Queue a line for this member without waiting
    ///
    /// A full queue means the peer is not keeping up; the line is dropped
    /// for this member only.
    pub fn try_send(&self, line: String) -> Result<(), SendError> {
        self.sender.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_connection_creation() {
        let conn = Connection::new(ConnectionId(1), peer());

        assert_eq!(conn.state(), ConnectionState::Handshaking);
        assert!(!conn.is_active());
        assert_eq!(conn.display_name(), "127.0.0.1:5000");
        assert!(conn.quit_sentinel().is_none());
    }

    #[test]
    fn test_connection_activate() {
        let mut conn = Connection::new(ConnectionId(1), peer());

        conn.activate("alice".to_string()).unwrap();

        assert!(conn.is_active());
        assert_eq!(conn.display_name(), "alice");
        assert_eq!(conn.quit_sentinel().as_deref(), Some("alice> \\quit"));
    }

    #[test]
    fn test_name_immutable_after_handshake() {
        let mut conn = Connection::new(ConnectionId(1), peer());
        conn.activate("alice".to_string()).unwrap();

        let err = conn.activate("mallory".to_string()).unwrap_err();

        assert!(matches!(err, ChatError::InvalidTransition { .. }));
        assert_eq!(conn.display_name(), "alice");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut conn = Connection::new(ConnectionId(1), peer());
        conn.activate("alice".to_string()).unwrap();

        conn.begin_close();
        assert_eq!(conn.state(), ConnectionState::Closing);

        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(conn.state(), ConnectionState::Closed);

        // Closed is terminal
        conn.begin_close();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_member_try_send() {
        let (tx, mut rx) = mpsc::channel(1);
        let member = Member::new(ConnectionId(1), "alice".to_string(), tx);

        assert!(member.try_send("one".to_string()).is_ok());
        assert_eq!(member.try_send("two".to_string()), Err(SendError::QueueFull));
        assert_eq!(rx.recv().await.as_deref(), Some("one"));

        drop(rx);
        assert_eq!(
            member.try_send("three".to_string()),
            Err(SendError::ChannelClosed)
        );
    }
}
