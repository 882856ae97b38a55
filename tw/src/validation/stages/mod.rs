//! The built-in validator stages, in pipeline order

mod format;
mod history;
mod llm;
mod mcp_sync;
mod schema;

pub use format::FormatValidator;
pub use history::HistoryValidator;
pub use llm::LlmValidator;
pub use mcp_sync::McpSyncValidator;
pub use schema::SchemaValidator;
