//! MCP error types

use std::time::Duration;

use thiserror::Error;

use super::protocol::RpcErrorObject;

/// Errors from the MCP connection layer.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {message}")]
    Spawn { server: String, message: String },

    #[error("handshake with '{server}' failed: {message}")]
    Handshake { server: String, message: String },

    #[error("RPC error from '{server}' ({code}): {message}")]
    Rpc { server: String, code: i64, message: String },

    #[error("MCP server '{server}' is dead")]
    ServerDead { server: String },

    #[error("request to '{server}' timed out after {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    #[error("unknown MCP server '{0}'")]
    UnknownServer(String),

    #[error("tool '{tool}' not found on server '{server}'")]
    UnknownTool { server: String, tool: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("protocol error from '{server}': {message}")]
    Protocol { server: String, message: String },
}

impl McpError {
    pub fn rpc(server: &str, error: RpcErrorObject) -> Self {
        McpError::Rpc {
            server: server.to_string(),
            code: error.code,
            message: error.message,
        }
    }

    /// True when the connection itself is gone and reconnecting may help.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, McpError::ServerDead { .. })
    }

    /// True when the underlying spawn failure was a permissions problem;
    /// the controller maps this to its dedicated exit code.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, McpError::Spawn { message, .. } if message.contains("permission denied"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(McpError::ServerDead { server: "fs".into() }.is_connection_loss());
        assert!(
            !McpError::Timeout {
                server: "fs".into(),
                timeout: Duration::from_secs(30)
            }
            .is_connection_loss()
        );
    }

    #[test]
    fn test_permission_denied_detection() {
        let err = McpError::Spawn {
            server: "fs".into(),
            message: "permission denied (os error 13)".into(),
        };
        assert!(err.is_permission_denied());
    }
}
