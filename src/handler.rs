//! Receiver worker
//!
//! One task per accepted connection: runs the handshake, then relays the
//! client's lines to the registry and the registry's fan-out back to the
//! client until the client quits, the stream fails, or the server
//! cancels the connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::{self, HANDLE_RECEIVED, SEND_HANDLE};
use crate::registry::RegistryHandle;

/// Everything a receiver worker shares with the rest of the server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub registry: RegistryHandle,
    /// Root token, cancelled on hard shutdown
    pub shutdown: CancellationToken,
    /// Generation token, cancelled by a soft disconnect or by shutdown
    pub cancel: CancellationToken,
}

/// Why the chat loop ended
#[derive(Debug)]
enum Exit {
    Quit,
    Failed(ChatError),
    SoftDisconnect,
    Shutdown,
}

/// Service one connection from handshake to close
///
/// The connection only becomes a fan-out target once the handshake has
/// succeeded. Every exit path removes it from the registry again.
pub async fn handle_connection(
    stream: TcpStream,
    mut conn: Connection,
    ctx: ConnectionContext,
) -> Result<(), ChatError> {
    debug!("Receiver worker started for {} ({})", conn.id, conn.peer);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; ctx.config.msg_length];
    let (queue_tx, mut queue_rx) = mpsc::channel::<String>(ctx.config.outbound_queue);

    let outcome = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        result = handshake(&mut reader, &mut writer, &mut buf, &mut conn, &ctx, queue_tx) => Some(result),
    };

    match outcome {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            debug!("Handshake with {} failed: {}", conn.peer, e);
            close(&mut conn, &mut writer, &ctx).await;
            return Err(e);
        }
        None => {
            debug!("Connection {} cancelled during handshake", conn.id);
            close(&mut conn, &mut writer, &ctx).await;
            return Ok(());
        }
    }

    let name = conn.display_name();
    let sentinel = conn.quit_sentinel();
    ctx.config.console().display(&message::connect_notice(&name));
    ctx.config.console().prompt(&ctx.config.handle);

    let idle = tokio::time::sleep(ctx.config.idle_timeout);
    tokio::pin!(idle);

    let exit = loop {
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => {
                break if ctx.shutdown.is_cancelled() {
                    Exit::Shutdown
                } else {
                    Exit::SoftDisconnect
                };
            }

            Some(line) = queue_rx.recv() => {
                if let Err(e) = message::write_frame(&mut writer, &line).await {
                    break Exit::Failed(e.into());
                }
            }

            read = message::read_frame(&mut reader, &mut buf) => {
                match read {
                    Ok(Some(text)) => {
                        idle.as_mut().reset(Instant::now() + ctx.config.idle_timeout);

                        if sentinel.as_deref() == Some(text.as_str()) {
                            break Exit::Quit;
                        }

                        ctx.config.console().display(&text);
                        ctx.config.console().prompt(&ctx.config.handle);
                        if let Err(e) = ctx.registry.broadcast(Some(conn.id), text).await {
                            break Exit::Failed(e);
                        }
                    }
                    Ok(None) => break Exit::Failed(ChatError::ConnectionClosed),
                    Err(e) => break Exit::Failed(e.into()),
                }
            }

            _ = &mut idle => break Exit::Failed(ChatError::Timeout),
        }
    };

    conn.begin_close();

    let result = match exit {
        Exit::Quit => {
            info!("Client {} ('{}') quit", conn.id, name);
            ctx.config.console().display(&format!("{} terminated connection", name));
            leave_registry(&conn, &ctx, true).await;
            Ok(())
        }
        Exit::Failed(e) => {
            warn!("Client {} ('{}') dropped: {}", conn.id, name, e);
            ctx.config.console().display(&format!("{} connection lost: {}", name, e));
            leave_registry(&conn, &ctx, true).await;
            Err(e)
        }
        Exit::SoftDisconnect => {
            flush(&mut queue_rx, &mut writer, &ctx).await;
            Ok(())
        }
        Exit::Shutdown => Ok(()),
    };

    close(&mut conn, &mut writer, &ctx).await;
    result
}

/// Two-step handshake
///
/// Name, then `HANDLE_RECEIVED`; `SEND_HANDLE`, then the server handle.
/// The connection joins the registry before the server handle is written.
async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    conn: &mut Connection,
    ctx: &ConnectionContext,
    queue: mpsc::Sender<String>,
) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let name = read_within(reader, buf, ctx).await?;
    if name.trim().is_empty() {
        return Err(ChatError::EmptyHandle);
    }
    message::write_frame(writer, HANDLE_RECEIVED).await?;

    let ready = read_within(reader, buf, ctx).await?;
    if ready != SEND_HANDLE {
        return Err(ChatError::HandshakeMismatch {
            expected: SEND_HANDLE.to_string(),
            received: ready,
        });
    }

    conn.activate(name.clone())?;
    ctx.registry.join(conn.id, name, queue).await?;

    if let Err(e) = message::write_frame(writer, &ctx.config.handle).await {
        // Peers already saw the connect notice
        leave_registry(conn, ctx, true).await;
        return Err(e.into());
    }

    Ok(())
}

/// Read one frame under the idle timeout
async fn read_within<R>(reader: &mut R, buf: &mut [u8], ctx: &ConnectionContext) -> Result<String, ChatError>
where
    R: AsyncRead + Unpin,
{
    match timeout(ctx.config.idle_timeout, message::read_frame(reader, buf)).await {
        Err(_) => Err(ChatError::Timeout),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(None)) => Err(ChatError::ConnectionClosed),
        Ok(Ok(Some(text))) => Ok(text),
    }
}

/// Remove this connection from the registry
///
/// With `announce` the remaining members get a departure notice. Returns
/// whether an entry was removed; a closed registry is logged and counts
/// as nothing removed.
async fn leave_registry(conn: &Connection, ctx: &ConnectionContext, announce: bool) -> bool {
    let notice = announce.then(|| message::departure_notice(&conn.display_name()));
    match ctx.registry.leave(conn.id, notice).await {
        Ok(removed) => removed,
        Err(e) => {
            debug!("Could not remove client {}: {}", conn.id, e);
            false
        }
    }
}

/// Write whatever the registry queued before a soft disconnect
async fn flush(
    queue_rx: &mut mpsc::Receiver<String>,
    writer: &mut OwnedWriteHalf,
    ctx: &ConnectionContext,
) {
    let drain = async {
        while let Ok(line) = queue_rx.try_recv() {
            message::write_frame(writer, &line).await?;
        }
        Ok::<_, std::io::Error>(())
    };

    match timeout(ctx.config.join_timeout, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Flush failed: {}", e),
        Err(_) => debug!("Flush timed out"),
    }
}

/// Close the stream and drop any registry entry
///
/// Safe to call more than once.
async fn close(conn: &mut Connection, writer: &mut OwnedWriteHalf, ctx: &ConnectionContext) {
    conn.begin_close();
    if !conn.close() {
        return;
    }

    if !ctx.shutdown.is_cancelled() {
        leave_registry(conn, ctx, false).await;
    }
    let _ = writer.shutdown().await;

    debug!("Connection {} closed", conn.id);
}
