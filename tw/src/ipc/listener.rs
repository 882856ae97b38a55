//! Daemon-side IPC socket
//!
//! Line-delimited JSON over a Unix domain socket: one request, one
//! response, connection closed. Stale sockets from a previous run are
//! cleaned up on bind.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::messages::{DaemonMessage, DaemonResponse};

/// Requests are tiny; anything bigger is a protocol violation.
const MAX_MESSAGE_SIZE: usize = 4096;

/// Bind the IPC socket, removing any stale file first.
pub fn create_listener_at(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create socket directory")?;
    }
    if socket_path.exists() {
        debug!(path = %socket_path.display(), "removing stale socket");
        std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
    }
    let listener = UnixListener::bind(socket_path).context("failed to bind IPC socket")?;
    debug!(path = %socket_path.display(), "IPC socket bound");
    Ok(listener)
}

/// Remove the socket file on shutdown.
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(path = %socket_path.display(), error = %e, "failed to remove socket");
        }
    }
}

/// Read one request line from a connection.
pub async fn read_message(stream: &mut UnixStream) -> Result<DaemonMessage> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await.context("failed to read IPC message")?;

    if bytes == 0 {
        return Err(eyre::eyre!("connection closed before a message arrived"));
    }
    if bytes > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("message too large: {bytes} bytes"));
    }

    let message = serde_json::from_str(line.trim()).context("failed to parse IPC message")?;
    debug!(?message, "ipc: request");
    Ok(message)
}

/// Write one response line.
pub async fn send_response(stream: &mut UnixStream, response: DaemonResponse) -> Result<()> {
    let mut line = serde_json::to_string(&response).context("failed to serialize response")?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await.context("failed to write response")?;
    stream.flush().await.context("failed to flush response")?;
    Ok(())
}

/// Convenience for tests and callers that own a path.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("taskweave")
        .join("taskweave.sock")
}
