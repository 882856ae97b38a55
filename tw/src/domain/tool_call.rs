//! Tool call records and canonical tool-name handling
//!
//! Internally every tool is addressed as `server__tool` (double underscore).
//! MCP servers themselves speak either `server_tool` (single underscore) or
//! the bare tool name; conversion to the wire form happens at the last hop,
//! inside the connection manager.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator used by the canonical form.
pub const CANONICAL_SEPARATOR: &str = "__";

/// Separator typically used on the MCP wire.
pub const WIRE_SEPARATOR: &str = "_";

/// A planned invocation of one tool on one MCP server.
///
/// `tool` always holds the canonical `server__tool` name. Construction via
/// [`ToolCall::new`] normalizes whatever form the planner produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Logical MCP server name.
    pub server: String,
    /// Canonical tool name (`server__tool`).
    pub tool: String,
    /// Tool arguments. Keys follow the tool's input schema.
    pub parameters: serde_json::Map<String, Value>,
}

impl ToolCall {
    /// Create a tool call, normalizing `tool` to the canonical form.
    pub fn new(
        server: impl Into<String>,
        tool: impl AsRef<str>,
        parameters: serde_json::Map<String, Value>,
    ) -> Self {
        let server = server.into();
        let tool = normalize(tool.as_ref(), &server);
        Self {
            server,
            tool,
            parameters,
        }
    }

    /// The short tool name with the server prefix stripped.
    pub fn short_name(&self) -> &str {
        short_name(&self.tool, &self.server)
    }

    /// The name to put on the MCP wire (`server_tool`).
    pub fn wire_name(&self) -> String {
        denormalize(&self.tool, &self.server)
    }

    /// Stable hash of the parameter map, used by the history guards to
    /// recognize repeated calls. serde_json maps are ordered, so equal
    /// parameter sets serialize identically.
    pub fn params_hash(&self) -> u64 {
        let serialized = serde_json::to_string(&self.parameters).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        hasher.finish()
    }

    /// `(server, tool, params_hash)` key used by the repetition guards.
    pub fn repetition_key(&self) -> (String, String, u64) {
        (self.server.clone(), self.tool.clone(), self.params_hash())
    }
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tool)
    }
}

/// Normalize a tool name to the canonical `server__tool` form.
///
/// Accepts the canonical form, the single-underscore wire form, or a bare
/// tool name. Total: every input maps to exactly one canonical name. A short
/// name that itself contains underscores is kept as an opaque suffix.
pub fn normalize(name: &str, server: &str) -> String {
    let canonical_prefix = format!("{server}{CANONICAL_SEPARATOR}");
    if name.starts_with(&canonical_prefix) {
        return name.to_string();
    }

    let wire_prefix = format!("{server}{WIRE_SEPARATOR}");
    if let Some(suffix) = name.strip_prefix(&wire_prefix) {
        if !suffix.is_empty() {
            return format!("{server}{CANONICAL_SEPARATOR}{suffix}");
        }
    }

    format!("{server}{CANONICAL_SEPARATOR}{name}")
}

/// Convert a canonical name to the single-underscore wire form.
///
/// Names that do not carry the canonical prefix pass through unchanged; the
/// connection manager resolves those against the live catalog instead.
pub fn denormalize(name: &str, server: &str) -> String {
    let canonical_prefix = format!("{server}{CANONICAL_SEPARATOR}");
    match name.strip_prefix(&canonical_prefix) {
        Some(suffix) => format!("{server}{WIRE_SEPARATOR}{suffix}"),
        None => name.to_string(),
    }
}

/// Strip the canonical server prefix, leaving the short tool name.
pub fn short_name<'a>(name: &'a str, server: &str) -> &'a str {
    let canonical_prefix = format!("{server}{CANONICAL_SEPARATOR}");
    name.strip_prefix(canonical_prefix.as_str()).unwrap_or(name)
}

/// True if `name` is already in canonical form for `server`.
pub fn is_canonical(name: &str, server: &str) -> bool {
    name.starts_with(&format!("{server}{CANONICAL_SEPARATOR}"))
}
