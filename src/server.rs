//! Listener and worker supervisor
//!
//! Accepts connections, enforces the capacity cap, supervises receiver
//! workers, and carries out soft disconnect and shutdown.
//!
//! Capacity is a semaphore whose permits are held by receiver workers for
//! their whole life. Connections arriving while every permit is taken wait
//! in a bounded FIFO queue; once that queue is full, newcomers get a
//! rejection notice and are closed.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{run_broadcast, BroadcastContext};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ChatError;
use crate::handler::{handle_connection, ConnectionContext};
use crate::message::{self, CAPACITY_EXCEEDED};
use crate::registry::{spawn_registry, RegistryHandle};
use crate::shutdown::{join_all_bounded, join_bounded, log_join};
use crate::types::ConnectionId;

/// Channel buffer size for listener control requests
const CONTROL_CHANNEL_SIZE: usize = 8;

/// Upper bound on delivering the capacity notice to a rejected peer
const REJECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Requests from the broadcast worker to the listener
#[derive(Debug)]
pub enum ServerControl {
    /// Drop every client but keep listening
    SoftDisconnect,
}

/// A bound chat server, ready to run
pub struct ChatServer {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    registry: RegistryHandle,
    shutdown: CancellationToken,
}

impl ChatServer {
    /// Bind the listening socket and start the registry
    ///
    /// A bind failure is fatal and reported as `ChatError::Bind`.
    pub async fn bind(config: ServerConfig, shutdown: CancellationToken) -> Result<Self, ChatError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Bind { addr, source })?;

        let registry = spawn_registry(config.registry_queue);

        Ok(Self {
            listener,
            config: Arc::new(config),
            registry,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    /// Serve until the shutdown token is cancelled
    ///
    /// `admin_input` feeds the broadcast worker. On shutdown the listener is
    /// closed, queued connections are dropped, and every worker is joined
    /// with a bounded wait before this returns.
    pub async fn run<R>(self, admin_input: R) -> Result<(), ChatError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let ChatServer {
            listener,
            config,
            registry,
            shutdown,
        } = self;

        let addr = listener.local_addr()?.to_string();
        info!("{} listening on {}", config.handle, addr);
        let console = config.console();
        console.listening(&config.handle, &addr);

        let (control_tx, mut control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let mut broadcast = tokio::spawn(run_broadcast(
            admin_input,
            BroadcastContext {
                config: config.clone(),
                registry: registry.clone(),
                shutdown: shutdown.clone(),
                control: control_tx,
            },
        ));

        let mut supervisor = Supervisor::new(config.clone(), registry, shutdown.clone());

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(control) = control_rx.recv() => match control {
                    ServerControl::SoftDisconnect => {
                        supervisor.soft_disconnect().await;
                        console.listening(&config.handle, &addr);
                    }
                },

                Some(result) = supervisor.workers.join_next(), if !supervisor.workers.is_empty() => {
                    log_join(result, "receiver worker");
                    supervisor.admit_pending();
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => supervisor.accept(stream, peer),
                    Err(e) => {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        drop(listener);
        console.display("closing welcome socket...");

        supervisor.shutdown().await;
        join_bounded(&mut broadcast, config.join_timeout, "broadcast worker").await;

        console.display("all workers joined");
        info!("{} shutting down", config.handle);
        Ok(())
    }
}

/// Owns the receiver workers and the capacity accounting
struct Supervisor {
    config: Arc<ServerConfig>,
    registry: RegistryHandle,
    shutdown: CancellationToken,
    /// Cancelled on soft disconnect; replaced afterwards
    generation: CancellationToken,
    slots: Arc<Semaphore>,
    pending: VecDeque<(TcpStream, SocketAddr)>,
    workers: JoinSet<()>,
    connection_counter: AtomicU64,
}

impl Supervisor {
    fn new(config: Arc<ServerConfig>, registry: RegistryHandle, shutdown: CancellationToken) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_clients)),
            generation: shutdown.child_token(),
            config,
            registry,
            shutdown,
            pending: VecDeque::new(),
            workers: JoinSet::new(),
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Connections currently holding a slot (handshaking or active)
    fn serviced(&self) -> usize {
        self.config.max_clients - self.slots.available_permits()
    }

    /// Service a freshly accepted stream, queue it, or reject it
    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.pending.is_empty() {
            if let Ok(permit) = self.slots.clone().try_acquire_owned() {
                self.spawn_worker(stream, peer, permit);
                return;
            }
        }

        if self.pending.len() < self.config.max_pending {
            info!(
                "At capacity ({} clients), queueing {}",
                self.config.max_clients, peer
            );
            self.pending.push_back((stream, peer));
        } else {
            reject(stream, peer);
        }
    }

    /// Hand free slots to queued connections in arrival order
    fn admit_pending(&mut self) {
        while !self.pending.is_empty() {
            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                break;
            };
            if let Some((stream, peer)) = self.pending.pop_front() {
                debug!("Admitting queued connection from {}", peer);
                self.spawn_worker(stream, peer, permit);
            }
        }
    }

    fn spawn_worker(&mut self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        let id = ConnectionId::next(&self.connection_counter);
        info!("New connection {} from {}", id, peer);

        let ctx = ConnectionContext {
            config: self.config.clone(),
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            cancel: self.generation.clone(),
        };
        let conn = Connection::new(id, peer);

        self.workers.spawn(async move {
            let _permit = permit;
            match handle_connection(stream, conn, ctx).await {
                Ok(()) => debug!("Connection {} finished", id),
                Err(e) => debug!("Connection {} ended: {}", id, e),
            }
        });

        debug!(
            "Serviced connections: {}/{}",
            self.serviced(),
            self.config.max_clients
        );
    }

    /// Drop every client but keep accepting
    async fn soft_disconnect(&mut self) {
        self.config.console().display(&format!(
            "{} disconnecting from all clients (will remain on)",
            self.config.handle
        ));

        let kill = message::quit_sentinel(&self.config.handle);
        match self.registry.disconnect_all(kill).await {
            Ok(count) => info!("Disconnected {} clients", count),
            Err(e) => warn!("Failed to disconnect clients: {}", e),
        }

        self.generation.cancel();
        join_all_bounded(&mut self.workers, self.config.join_timeout).await;
        self.generation = self.shutdown.child_token();

        debug!("Serviced connections after disconnect: {}", self.serviced());
        self.admit_pending();
    }

    /// Close queued connections and join every worker
    async fn shutdown(&mut self) {
        for (_, peer) in self.pending.drain(..) {
            debug!("Closing queued connection from {}", peer);
        }
        join_all_bounded(&mut self.workers, self.config.join_timeout).await;
    }
}

/// Refuse a connection because the pending queue is full
///
/// The notice is written from its own task under `REJECT_TIMEOUT`, so a
/// peer that never reads cannot hold up the accept loop.
fn reject(mut stream: TcpStream, peer: SocketAddr) {
    warn!("Pending queue full, rejecting {}", peer);
    tokio::spawn(async move {
        let notice = async {
            stream.write_all(CAPACITY_EXCEEDED.as_bytes()).await?;
            stream.shutdown().await
        };
        match timeout(REJECT_TIMEOUT, notice).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Could not send capacity notice to {}: {}", peer, e),
            Err(_) => debug!("Capacity notice to {} timed out", peer),
        }
    });
}
