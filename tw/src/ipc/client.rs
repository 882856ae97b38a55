//! Controller-side IPC client

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::listener::default_socket_path;
use super::messages::{DaemonMessage, DaemonResponse, StatusReport};

/// Ceiling on one request/response exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot request client for the daemon socket.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn request(&self, message: DaemonMessage) -> Result<DaemonResponse> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.socket_path)
                .await
                .context("failed to connect to daemon socket")?;

            let mut line = serde_json::to_string(&message)?;
            line.push('\n');
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await?;

            let mut reader = BufReader::new(&mut stream);
            let mut response = String::new();
            reader.read_line(&mut response).await?;
            let response: DaemonResponse =
                serde_json::from_str(response.trim()).context("failed to parse daemon response")?;
            Ok::<_, eyre::Report>(response)
        };

        tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| eyre!("daemon did not respond within {REQUEST_TIMEOUT:?}"))?
    }

    /// Liveness probe; returns the daemon's version.
    pub async fn ping(&self) -> Result<String> {
        match self.request(DaemonMessage::Ping).await? {
            DaemonResponse::Pong { version } => Ok(version),
            other => Err(eyre!("unexpected response to ping: {other:?}")),
        }
    }

    /// Live status snapshot.
    pub async fn status(&self) -> Result<StatusReport> {
        match self.request(DaemonMessage::Status).await? {
            DaemonResponse::Status(report) => Ok(report),
            DaemonResponse::Error { message } => Err(eyre!("daemon error: {message}")),
            other => Err(eyre!("unexpected response to status: {other:?}")),
        }
    }

    /// Cancel a session's in-flight work.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        match self
            .request(DaemonMessage::CancelSession {
                session_id: session_id.to_string(),
            })
            .await?
        {
            DaemonResponse::Ok => Ok(()),
            DaemonResponse::Error { message } => Err(eyre!("daemon error: {message}")),
            other => Err(eyre!("unexpected response to cancel: {other:?}")),
        }
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}
