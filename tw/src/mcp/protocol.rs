//! JSON-RPC 2.0 wire types for the MCP stdio transport
//!
//! Messages are single JSON objects, one per line. Requests carry a
//! monotonically increasing numeric id; notifications carry none. Servers
//! may also send their own requests (ignored here) and notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound notification frame (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object inside a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound response frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

/// Any message a server may emit on its stdout.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Response to one of our requests.
    Response(Response),
    /// A request initiated by the server (id + method).
    ServerRequest { id: Value, method: String },
    /// A notification (method, no id).
    Notification { method: String },
}

/// Parse one line of server output.
///
/// Classification: an `id` plus `result`/`error` is a response; an `id` plus
/// `method` is a server-initiated request; a bare `method` is a
/// notification. Anything else is a protocol error.
pub fn parse_incoming(line: &str) -> Result<Incoming, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;

    let has_method = value.get("method").is_some();
    let has_id = value.get("id").is_some();

    if has_id && !has_method {
        let response: Response = serde_json::from_value(value)?;
        return Ok(Incoming::Response(response));
    }
    if has_id && has_method {
        return Ok(Incoming::ServerRequest {
            id: value["id"].clone(),
            method: value["method"].as_str().unwrap_or_default().to_string(),
        });
    }
    if has_method {
        return Ok(Incoming::Notification {
            method: value["method"].as_str().unwrap_or_default().to_string(),
        });
    }

    // Neither id nor method: force a descriptive error through serde
    let response: Response = serde_json::from_value(value)?;
    Ok(Incoming::Response(response))
}

/// One tool advertised by a server via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Wire name (no canonical normalization applied).
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema (draft-07 subset) for the tool's arguments.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Decoded `tools/list` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Decoded `initialize` result. Capabilities stay opaque.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
}

/// Decoded `tools/call` result: flattened text content plus the error flag.
#[derive(Debug, Clone, Default)]
pub struct CallToolResult {
    pub text: String,
    pub is_error: bool,
}

impl CallToolResult {
    /// Flatten the `content` array, keeping `text` items.
    pub fn from_value(value: &Value) -> Self {
        let is_error = value.get("isError").and_then(Value::as_bool).unwrap_or(false);
        let text = value
            .get("content")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Self { text, is_error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_without_null_params() {
        let request = Request::new(1, "tools/list", None);
        let line = serde_json::to_string(&request).unwrap();
        assert!(!line.contains("params"));
        assert!(line.contains("\"id\":1"));
        assert!(line.contains("\"jsonrpc\":\"2.0\""));
    }

    #[test]
    fn test_parse_response() {
        let incoming = parse_incoming(r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#).unwrap();
        match incoming {
            Incoming::Response(r) => {
                assert_eq!(r.id, 7);
                assert!(r.result.is_some());
                assert!(r.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let incoming =
            parse_incoming(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"no such method"}}"#)
                .unwrap();
        match incoming {
            Incoming::Response(r) => {
                let error = r.error.unwrap();
                assert_eq!(error.code, -32601);
                assert_eq!(error.message, "no such method");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification() {
        let incoming =
            parse_incoming(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#).unwrap();
        assert!(matches!(incoming, Incoming::Notification { method } if method == "notifications/progress"));
    }

    #[test]
    fn test_parse_server_request() {
        let incoming = parse_incoming(r#"{"jsonrpc":"2.0","id":"srv-1","method":"roots/list"}"#).unwrap();
        assert!(matches!(incoming, Incoming::ServerRequest { method, .. } if method == "roots/list"));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_incoming("not json").is_err());
        assert!(parse_incoming(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[test]
    fn test_tools_list_result() {
        let value = serde_json::json!({
            "tools": [
                {"name": "read_file", "description": "Read a file", "inputSchema": {"type": "object"}},
                {"name": "list_directory"}
            ]
        });
        let result: ToolsListResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.tools.len(), 2);
        assert_eq!(result.tools[0].name, "read_file");
        assert!(result.tools[1].description.is_none());
    }

    #[test]
    fn test_call_tool_result_flattens_text() {
        let value = serde_json::json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "line two"}
            ]
        });
        let result = CallToolResult::from_value(&value);
        assert_eq!(result.text, "line one\nline two");
        assert!(!result.is_error);
    }

    #[test]
    fn test_call_tool_result_error_flag() {
        let value = serde_json::json!({
            "content": [{"type": "text", "text": "denied"}],
            "isError": true
        });
        let result = CallToolResult::from_value(&value);
        assert!(result.is_error);
        assert_eq!(result.text, "denied");
    }
}
