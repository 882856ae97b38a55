//! Control-plane IPC between the `tw` CLI and the daemon
//!
//! Line-delimited JSON over a Unix domain socket, one request per
//! connection. This is the controller's surface only; user traffic enters
//! through the web layer.

mod client;
mod listener;
mod messages;

pub use client::DaemonClient;
pub use listener::{cleanup_socket, create_listener_at, default_socket_path, read_message, send_response};
pub use messages::{DaemonMessage, DaemonResponse, ServerReport, StatusReport};

use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::orchestrator::Orchestrator;

/// Serve control requests until shutdown. Each connection carries exactly
/// one request.
pub async fn serve(listener: UnixListener, orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let Ok((mut stream, _)) = accepted else {
            warn!("ipc: accept failed");
            continue;
        };

        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let response = match read_message(&mut stream).await {
                Ok(DaemonMessage::Ping) => DaemonResponse::Pong {
                    version: crate::daemon::VERSION.to_string(),
                },
                Ok(DaemonMessage::Status) => {
                    let servers = orchestrator
                        .mcp()
                        .statuses()
                        .await
                        .into_iter()
                        .map(|s| ServerReport {
                            name: s.name,
                            status: s.status.as_str().to_string(),
                            tool_count: s.tool_count,
                        })
                        .collect();
                    DaemonResponse::Status(StatusReport {
                        pid: std::process::id(),
                        version: crate::daemon::VERSION.to_string(),
                        active_sessions: orchestrator.sessions().len().await,
                        servers,
                    })
                }
                Ok(DaemonMessage::CancelSession { session_id }) => {
                    if orchestrator.cancel_session(&session_id).await {
                        DaemonResponse::Ok
                    } else {
                        DaemonResponse::Error {
                            message: format!("no session '{session_id}'"),
                        }
                    }
                }
                Err(e) => DaemonResponse::Error { message: e.to_string() },
            };

            if let Err(e) = send_response(&mut stream, response).await {
                debug!(error = %e, "ipc: failed to respond");
            }
        });
    }
}
