//! Wire protocol definitions
//!
//! Raw text frames over TCP. Each message is exactly one read of at most
//! `msg_length` bytes on the receiving side and one write on the sending
//! side; there is no delimiter beyond the read boundary.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Server acknowledgment of the client's display name
pub const HANDLE_RECEIVED: &str = "HANDLE_RECEIVED";

/// Client request for the server's display name
pub const SEND_HANDLE: &str = "SEND_HANDLE";

/// Quit command typed after the `<handle>> ` prefix
pub const QUIT_COMMAND: &str = "\\quit";

/// Sent to a connection rejected because the pending queue is full
pub const CAPACITY_EXCEEDED: &str = "Server is full, try again later";

/// Format a chat line as `<handle>> <text>`
pub fn format_line(handle: &str, text: &str) -> String {
    format!("{}> {}", handle, text)
}

/// The disconnect sentinel for `handle`
pub fn quit_sentinel(handle: &str) -> String {
    format_line(handle, QUIT_COMMAND)
}

/// Notice fanned out when a client finishes its handshake
pub fn connect_notice(name: &str) -> String {
    format!("Client {} connected", name)
}

/// Notice fanned out when a client leaves
pub fn departure_notice(name: &str) -> String {
    format!("Client {} disconnected", name)
}

/// Decode one frame as text
///
/// Invalid UTF-8 is replaced rather than rejected. Trailing line terminators
/// and NUL padding are stripped so line-oriented clients interoperate.
pub fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n', '\0'])
        .to_string()
}

/// Read a single frame of at most `buf.len()` bytes
///
/// Returns `None` when the peer has closed the stream.
pub async fn read_frame<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read(buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(decode(&buf[..n])))
}

/// Write a single frame
pub async fn write_frame<W>(writer: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_sentinel() {
        assert_eq!(quit_sentinel("alice"), "alice> \\quit");
        assert_eq!(quit_sentinel("Server"), format_line("Server", "\\quit"));
    }

    #[test]
    fn test_notices() {
        assert_eq!(connect_notice("bob"), "Client bob connected");
        assert_eq!(departure_notice("bob"), "Client bob disconnected");
    }

    #[test]
    fn test_decode_strips_terminators() {
        assert_eq!(decode(b"hello\r\n"), "hello");
        assert_eq!(decode(b"name\0\0"), "name");
        assert_eq!(decode(b"  spaced  "), "  spaced  ");
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let text = decode(&[b'h', 0xff, b'i']);
        assert!(text.starts_with('h'));
        assert!(text.ends_with('i'));
    }

    #[tokio::test]
    async fn test_read_frame_is_bounded() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, "0123456789").await.unwrap();

        let mut buf = [0u8; 4];
        let first = read_frame(&mut server, &mut buf).await.unwrap();
        assert_eq!(first.as_deref(), Some("0123"));
    }

    #[tokio::test]
    async fn test_read_frame_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let mut buf = [0u8; 16];
        assert!(read_frame(&mut server, &mut buf).await.unwrap().is_none());
    }
}
