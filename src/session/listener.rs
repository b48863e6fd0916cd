//! Daemon socket listener
//!
//! Helpers for creating and managing the Unix Domain Socket listener and
//! for reading/writing newline-delimited JSON frames on a connection.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, warn};

use super::protocol::{ClientRequest, ResponseFrame};

/// Maximum request frame size
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Create and bind the daemon socket listener
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind daemon socket")?;
    debug!(?socket_path, "create_listener_at: socket bound");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one request frame; `None` on clean disconnect
pub async fn read_request(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<ClientRequest>> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await.context("Failed to read request")?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if bytes_read > MAX_REQUEST_SIZE {
        return Err(eyre::eyre!("Request too large: {} bytes", bytes_read));
    }

    let request: ClientRequest = serde_json::from_str(line.trim()).context("Failed to parse request")?;
    debug!(?request, "read_request: parsed request");

    Ok(Some(request))
}

/// Send one response frame
pub async fn write_frame(writer: &mut OwnedWriteHalf, frame: &ResponseFrame) -> Result<()> {
    let json = serde_json::to_string(frame).context("Failed to serialize frame")?;
    writer.write_all(json.as_bytes()).await.context("Failed to write frame")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush frame")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::protocol::FrameRole;
    use tempfile::TempDir;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_create_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("subdir").join("errand.sock");

        let (_, path) = create_listener_at(&socket_path).unwrap();
        assert_eq!(path, socket_path);
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_create_listener_removes_stale_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("errand.sock");

        std::fs::write(&socket_path, "stale").unwrap();
        assert!(create_listener_at(&socket_path).is_ok());
    }

    #[test]
    fn test_cleanup_socket_removes_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("errand.sock");

        std::fs::write(&socket_path, "test").unwrap();
        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_cleanup_socket_handles_missing_file() {
        let temp = TempDir::new().unwrap();
        cleanup_socket(&temp.path().join("nonexistent.sock"));
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_stream() {
        let (client, server) = UnixStream::pair().unwrap();
        let (server_read, _server_write) = server.into_split();
        let (_client_read, mut client_write) = client.into_split();

        // Client side writes a request line manually
        client_write
            .write_all(b"{\"type\":\"Chat\",\"message\":\"hello\"}\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(server_read);
        let request = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(request, ClientRequest::Chat { message: "hello".to_string() });
    }

    #[tokio::test]
    async fn test_write_frame_is_newline_delimited() {
        let (client, server) = UnixStream::pair().unwrap();
        let (client_read, _client_write) = client.into_split();
        let (_server_read, mut server_write) = server.into_split();

        write_frame(
            &mut server_write,
            &ResponseFrame::Text {
                role: FrameRole::Assistant,
                content: "hi".to_string(),
            },
        )
        .await
        .unwrap();
        write_frame(&mut server_write, &ResponseFrame::Done).await.unwrap();

        let mut reader = BufReader::new(client_read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let frame: ResponseFrame = serde_json::from_str(line.trim()).unwrap();
        assert!(matches!(frame, ResponseFrame::Text { .. }));

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let frame: ResponseFrame = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(frame, ResponseFrame::Done);
    }

    #[tokio::test]
    async fn test_read_request_eof_is_none() {
        let (client, server) = UnixStream::pair().unwrap();
        let (server_read, _server_write) = server.into_split();
        drop(client);

        let mut reader = BufReader::new(server_read);
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_invalid_json_is_error() {
        let (client, server) = UnixStream::pair().unwrap();
        let (server_read, _server_write) = server.into_split();
        let (_client_read, mut client_write) = client.into_split();

        client_write.write_all(b"not json\n").await.unwrap();

        let mut reader = BufReader::new(server_read);
        assert!(read_request(&mut reader).await.is_err());
    }
}
