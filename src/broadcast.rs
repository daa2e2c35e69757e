//! Broadcast worker
//!
//! Relays administrator-typed lines to every active connection. The admin
//! quit command asks the listener for a soft disconnect instead.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::message;
use crate::registry::RegistryHandle;
use crate::server::ServerControl;

#[derive(Debug, Clone)]
pub struct BroadcastContext {
    pub config: Arc<ServerConfig>,
    pub registry: RegistryHandle,
    pub shutdown: CancellationToken,
    /// Requests to the listener
    pub control: mpsc::Sender<ServerControl>,
}

/// Run until shutdown or until admin input reaches EOF
///
/// EOF only ends this worker; the server keeps serving clients.
pub async fn run_broadcast<R>(input: R, ctx: BroadcastContext)
where
    R: AsyncBufRead + Unpin,
{
    let handle = ctx.config.handle.clone();
    let quit = message::quit_sentinel(&handle);
    let mut lines = input.lines();

    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => break,

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let outgoing = message::format_line(&handle, line.trim_end_matches('\r'));

                    if outgoing == quit {
                        info!("Admin requested disconnect of all clients");
                        if ctx.control.send(ServerControl::SoftDisconnect).await.is_err() {
                            debug!("Listener gone, ending broadcast worker");
                            break;
                        }
                        continue;
                    }

                    if let Err(e) = ctx.registry.broadcast(None, outgoing).await {
                        warn!("Broadcast failed: {}", e);
                        break;
                    }
                    ctx.config.console().prompt(&handle);
                }
                Ok(None) => {
                    info!("Admin input closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read admin input: {}", e);
                    tokio::time::sleep(ctx.config.poll_interval).await;
                }
            },
        }
    }

    debug!("Broadcast worker stopped");
}
