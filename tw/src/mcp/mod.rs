//! Model-Context-Protocol plumbing: stdio JSON-RPC, connections, manager

mod connection;
mod error;
mod manager;
mod protocol;

pub use connection::McpConnection;
pub use error::McpError;
pub use manager::{Connector, McpManager, McpManagerConfig, ProcessConnector, ServerSnapshot, ServerStatus};
pub use protocol::{
    CallToolResult, InitializeResult, PROTOCOL_VERSION, Request, Response, RpcErrorObject, ToolDescriptor,
    ToolsListResult,
};

#[cfg(test)]
pub use connection::testing;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How to launch one MCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    /// Executable to spawn.
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment passed to the child.
    pub env: HashMap<String, String>,
}
