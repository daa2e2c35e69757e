//! Chat client
//!
//! Connects to a chat server, runs the handshake, then relays lines typed
//! by the user to the server and frames from the server to the user until
//! either side quits.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::message::{self, HANDLE_RECEIVED, SEND_HANDLE};

/// Longest handle a client may pick, in characters
pub const MAX_HANDLE_LENGTH: usize = 10;

/// Upper bound on each handshake reply
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Check a user-typed handle: 1-10 characters and no whitespace
///
/// Surrounding whitespace (such as the newline from a prompt) is ignored.
pub fn validate_handle(input: &str) -> Result<String, ChatError> {
    let handle = input.trim();
    let length = handle.chars().count();

    if length == 0 || length > MAX_HANDLE_LENGTH || handle.chars().any(char::is_whitespace) {
        return Err(ChatError::InvalidHandle(handle.to_string()));
    }
    Ok(handle.to_string())
}

/// Why a client session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The user quit, closed input, or the process was signalled
    Quit,
    /// The server sent its quit sentinel
    ServerDisconnected,
    /// The server closed the stream
    ServerClosed,
}

/// A connected client that has completed the handshake
pub struct ChatClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    handle: String,
    server_handle: String,
    buf: Vec<u8>,
}

impl ChatClient {
    /// Connect to `addr` and register as `handle`
    ///
    /// Frames are read `msg_length` bytes at a time, matching the server.
    pub async fn connect(addr: &str, handle: &str, msg_length: usize) -> Result<Self, ChatError> {
        let handle = validate_handle(handle)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ChatError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; msg_length];

        message::write_frame(&mut writer, &handle).await?;
        let ack = reply(&mut reader, &mut buf).await?;
        if ack != HANDLE_RECEIVED {
            return Err(ChatError::HandshakeMismatch {
                expected: HANDLE_RECEIVED.to_string(),
                received: ack,
            });
        }

        message::write_frame(&mut writer, SEND_HANDLE).await?;
        let server_handle = reply(&mut reader, &mut buf).await?;
        info!("Connected to {} at {} as {}", server_handle, addr, handle);

        Ok(Self {
            reader,
            writer,
            handle,
            server_handle,
            buf,
        })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn server_handle(&self) -> &str {
        &self.server_handle
    }

    /// Chat until the user quits, the server disconnects, or `shutdown` fires
    ///
    /// Every line from `input` goes out as `<handle>> <line>`. Frames from
    /// the server are written to `output`, one per line, behind a prompt.
    /// Closing `input` or cancelling `shutdown` sends the quit sentinel.
    pub async fn run<I, O>(
        self,
        input: I,
        mut output: O,
        shutdown: CancellationToken,
    ) -> Result<ClientExit, ChatError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let ChatClient {
            mut reader,
            mut writer,
            handle,
            server_handle,
            mut buf,
        } = self;
        let limit = buf.len();
        let quit = message::quit_sentinel(&handle);
        let server_quit = message::quit_sentinel(&server_handle);
        let prompt = format!("{}> ", handle);
        let mut lines = input.lines();

        show(&mut output, &prompt).await?;

        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Client interrupted, sending quit");
                    send(&mut writer, &quit, limit).await?;
                    break ClientExit::Quit;
                }

                line = lines.next_line() => match line? {
                    Some(line) => {
                        let line = line.trim_end_matches('\r');
                        if line.is_empty() {
                            show(&mut output, &prompt).await?;
                            continue;
                        }

                        let outgoing = message::format_line(&handle, line);
                        send(&mut writer, &outgoing, limit).await?;
                        if outgoing == quit {
                            break ClientExit::Quit;
                        }
                        show(&mut output, &prompt).await?;
                    }
                    None => {
                        send(&mut writer, &quit, limit).await?;
                        break ClientExit::Quit;
                    }
                },

                frame = message::read_frame(&mut reader, &mut buf) => match frame? {
                    None => break ClientExit::ServerClosed,
                    Some(text) if text == server_quit => break ClientExit::ServerDisconnected,
                    Some(text) => {
                        show(&mut output, &format!("\r{}\n", text)).await?;
                        show(&mut output, &prompt).await?;
                    }
                },
            }
        };

        let farewell = match exit {
            ClientExit::Quit => format!("\r{} disconnected\n", handle),
            _ => format!("\r{} terminated the connection\n", server_handle),
        };
        show(&mut output, &farewell).await?;
        let _ = writer.shutdown().await;

        info!("Client session ended: {:?}", exit);
        Ok(exit)
    }
}

/// Write one frame, cut down to what the server reads in one go
async fn send(writer: &mut OwnedWriteHalf, text: &str, limit: usize) -> Result<(), ChatError> {
    let mut end = text.len().min(limit);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    if end < text.len() {
        warn!("Message truncated to {} bytes", end);
    }
    message::write_frame(writer, &text[..end]).await?;
    Ok(())
}

/// Read one handshake reply
async fn reply(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<String, ChatError> {
    match timeout(HANDSHAKE_TIMEOUT, message::read_frame(reader, buf)).await {
        Err(_) => Err(ChatError::Timeout),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(None)) => Err(ChatError::ConnectionClosed),
        Ok(Ok(Some(text))) => Ok(text),
    }
}

async fn show<O>(output: &mut O, text: &str) -> Result<(), ChatError>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
