//! Connection registry actor
//!
//! The single owner of the set of `Active` connections. Workers reach it
//! only through `RegistryHandle`, so every insert, removal and fan-out is
//! serialized through one command queue: a broadcast sees each member
//! either fully present or fully absent.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Member;
use crate::error::{ChatError, SendError};
use crate::message;
use crate::types::ConnectionId;

/// Commands sent from workers to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Handshake finished, add as fan-out target
    Join {
        member: Member,
        respond_to: oneshot::Sender<()>,
    },
    /// Fan out a line to every member except `from`
    Broadcast {
        from: Option<ConnectionId>,
        line: String,
    },
    /// Remove a member, optionally telling the others
    Leave {
        id: ConnectionId,
        notice: Option<String>,
        respond_to: oneshot::Sender<bool>,
    },
    /// Send `message` to everyone, then drop every member
    DisconnectAll {
        message: String,
        respond_to: oneshot::Sender<usize>,
    },
    /// Number of members
    Count { respond_to: oneshot::Sender<usize> },
    /// Member names in id order
    Names {
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

/// The registry actor
///
/// Keyed by `ConnectionId` so fan-out iterates in accept order.
pub struct Registry {
    members: BTreeMap<ConnectionId, Member>,
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl Registry {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            members: BTreeMap::new(),
            receiver,
        }
    }

    /// Run the registry event loop
    ///
    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("Registry shutting down");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Join { member, respond_to } => {
                self.handle_join(member);
                let _ = respond_to.send(());
            }
            RegistryCommand::Broadcast { from, line } => {
                self.fan_out(from, &line);
            }
            RegistryCommand::Leave {
                id,
                notice,
                respond_to,
            } => {
                let removed = self.handle_leave(id, notice);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::DisconnectAll {
                message,
                respond_to,
            } => {
                let dropped = self.handle_disconnect_all(&message);
                let _ = respond_to.send(dropped);
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.members.len());
            }
            RegistryCommand::Names { respond_to } => {
                let names = self.members.values().map(|m| m.name.clone()).collect();
                let _ = respond_to.send(names);
            }
        }
    }

    fn handle_join(&mut self, member: Member) {
        let id = member.id;
        let notice = message::connect_notice(&member.name);
        info!("Client {} joined as '{}'", id, member.name);

        self.members.insert(id, member);
        self.fan_out(Some(id), &notice);

        debug!("Active members: {}", self.members.len());
    }

    fn handle_leave(&mut self, id: ConnectionId, notice: Option<String>) -> bool {
        let Some(member) = self.members.remove(&id) else {
            return false;
        };

        info!("Client {} ('{}') left", id, member.name);

        if let Some(notice) = notice {
            self.fan_out(None, &notice);
        }

        debug!("Active members: {}", self.members.len());
        true
    }

    fn handle_disconnect_all(&mut self, message: &str) -> usize {
        let members = std::mem::take(&mut self.members);
        for member in members.values() {
            debug!("Disconnecting client {}", member.id);
            let _ = member.try_send(message.to_string());
        }
        members.len()
    }

    /// Queue `line` for every member except `from`
    fn fan_out(&self, from: Option<ConnectionId>, line: &str) {
        for member in self.members.values() {
            if Some(member.id) == from {
                continue;
            }
            match member.try_send(line.to_string()) {
                Ok(()) => {}
                Err(SendError::QueueFull) => {
                    warn!("Outbound queue full for client {}, dropping message", member.id);
                }
                Err(SendError::ChannelClosed) => {
                    debug!("Client {} is closing, skipping", member.id);
                }
            }
        }
    }
}

/// Cloneable handle to the registry actor
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Register an `Active` member and announce it to the others
    ///
    /// Returns once the member is a fan-out target.
    pub async fn join(
        &self,
        id: ConnectionId,
        name: String,
        queue: mpsc::Sender<String>,
    ) -> Result<(), ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Join {
            member: Member::new(id, name, queue),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| ChatError::RegistryClosed)
    }

    /// Fan out `line` to every member except `from`
    pub async fn broadcast(
        &self,
        from: Option<ConnectionId>,
        line: String,
    ) -> Result<(), ChatError> {
        self.send(RegistryCommand::Broadcast { from, line }).await
    }

    /// Remove a member
    ///
    /// Removing an absent member is a no-op and returns `false`.
    pub async fn leave(&self, id: ConnectionId, notice: Option<String>) -> Result<bool, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Leave {
            id,
            notice,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| ChatError::RegistryClosed)
    }

    /// Send a final message to every member and clear the registry
    pub async fn disconnect_all(&self, message: String) -> Result<usize, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::DisconnectAll {
            message,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| ChatError::RegistryClosed)
    }

    pub async fn active_count(&self) -> Result<usize, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Count { respond_to: tx }).await?;
        rx.await.map_err(|_| ChatError::RegistryClosed)
    }

    pub async fn names(&self) -> Result<Vec<String>, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Names { respond_to: tx }).await?;
        rx.await.map_err(|_| ChatError::RegistryClosed)
    }

    async fn send(&self, cmd: RegistryCommand) -> Result<(), ChatError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| ChatError::RegistryClosed)
    }
}

/// Spawn the registry actor and return a handle to it
pub fn spawn_registry(buffer: usize) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(Registry::new(rx).run());
    RegistryHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(registry: &RegistryHandle, id: u64, name: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        registry
            .join(ConnectionId(id), name.to_string(), tx)
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_join_notifies_others_not_self() {
        let registry = spawn_registry(16);
        let mut alice = join(&registry, 1, "alice").await;
        let mut bob = join(&registry, 2, "bob").await;

        assert_eq!(alice.recv().await.as_deref(), Some("Client bob connected"));
        assert!(bob.try_recv().is_err());
        assert_eq!(registry.active_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = spawn_registry(16);
        let mut alice = join(&registry, 1, "alice").await;
        let mut bob = join(&registry, 2, "bob").await;
        let mut carol = join(&registry, 3, "carol").await;
        while alice.try_recv().is_ok() {}
        while bob.try_recv().is_ok() {}

        registry
            .broadcast(Some(ConnectionId(2)), "bob> hi".to_string())
            .await
            .unwrap();
        // Round trip to make sure the broadcast was processed
        registry.active_count().await.unwrap();

        assert_eq!(alice.try_recv().ok().as_deref(), Some("bob> hi"));
        assert_eq!(carol.try_recv().ok().as_deref(), Some("bob> hi"));
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let registry = spawn_registry(16);
        let mut alice = join(&registry, 1, "alice").await;
        let _bob = join(&registry, 2, "bob").await;
        while alice.try_recv().is_ok() {}

        let removed = registry
            .leave(ConnectionId(2), Some("Client bob disconnected".to_string()))
            .await
            .unwrap();
        assert!(removed);
        assert_eq!(
            alice.try_recv().ok().as_deref(),
            Some("Client bob disconnected")
        );

        let removed_again = registry
            .leave(ConnectionId(2), Some("Client bob disconnected".to_string()))
            .await
            .unwrap();
        assert!(!removed_again);
        assert!(alice.try_recv().is_err());
        assert_eq!(registry.names().await.unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let registry = spawn_registry(16);
        let mut alice = join(&registry, 1, "alice").await;
        let mut bob = join(&registry, 2, "bob").await;
        while alice.try_recv().is_ok() {}

        let dropped = registry
            .disconnect_all("Server> \\quit".to_string())
            .await
            .unwrap();

        assert_eq!(dropped, 2);
        assert_eq!(registry.active_count().await.unwrap(), 0);
        assert_eq!(alice.recv().await.as_deref(), Some("Server> \\quit"));
        assert_eq!(bob.recv().await.as_deref(), Some("Server> \\quit"));
        // Registry dropped its senders
        assert!(alice.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_names_in_id_order() {
        let registry = spawn_registry(16);
        let _c = join(&registry, 3, "carol").await;
        let _a = join(&registry, 1, "alice").await;
        let _b = join(&registry, 2, "bob").await;

        assert_eq!(
            registry.names().await.unwrap(),
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
        );
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let registry = spawn_registry(16);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        registry
            .join(ConnectionId(1), "slow".to_string(), slow_tx)
            .await
            .unwrap();
        let mut fast = join(&registry, 2, "fast").await;

        for i in 0..4 {
            registry.broadcast(None, format!("line {}", i)).await.unwrap();
        }
        registry.active_count().await.unwrap();

        for i in 0..4 {
            assert_eq!(fast.try_recv().ok(), Some(format!("line {}", i)));
        }
    }
}
