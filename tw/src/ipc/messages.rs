//! IPC message types between the controller CLI and the daemon

use serde::{Deserialize, Serialize};

/// Requests the controller sends over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    Ping,
    Status,
    CancelSession { session_id: String },
}

/// Daemon replies, one per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    Pong { version: String },
    Status(StatusReport),
    Ok,
    Error { message: String },
}

/// Live daemon state for `tw status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub pid: u32,
    pub version: String,
    pub active_sessions: usize,
    pub servers: Vec<ServerReport>,
}

/// Per-MCP-server state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerReport {
    pub name: String,
    pub status: String,
    pub tool_count: usize,
}
