//! taskweave - MCP task-execution orchestrator
//!
//! Turns a user utterance into a verified sequence of tool invocations
//! against external MCP servers. Three personas (planner, executor,
//! verifier) share one LLM client; a deterministic state machine drives
//! every request through mode selection, planning, a per-item execution
//! loop, verification, replanning, and a final summary, while progress
//! streams to the web layer as typed frames.
//!
//! # Modules
//!
//! - [`workflow`] - state machine, transition table, handlers, sessions
//! - [`mcp`] - stdio JSON-RPC connections and the connection manager
//! - [`validation`] - staged tool-call validation with auto-correction
//! - [`outbound`] - rate-limited, breaker-guarded HTTP to upstream services
//! - [`history`] - bounded execution history and repetition inspectors
//! - [`llm`] - chat-completions client shared by the personas
//! - [`events`] - typed frame bus consumed by the web layer
//! - [`orchestrator`] - composition root tying everything together

pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod events;
pub mod history;
pub mod ipc;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod outbound;
pub mod prompts;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use domain::{ExecutionRecord, Item, ItemStatus, Todo, ToolCall, VerificationRecord};
pub use events::{EventBus, EventEmitter, Frame};
pub use history::{HistoryEntry, InspectionDecision, InspectionManager, RepetitionInspector, ToolHistory};
pub use ipc::{DaemonClient, StatusReport};
pub use llm::{ChatCompletionsClient, CompletionRequest, CompletionResponse, LlmClient, LlmError};
pub use mcp::{McpConnection, McpError, McpManager, McpServerConfig, ServerStatus};
pub use orchestrator::Orchestrator;
pub use outbound::{CircuitBreaker, OutboundError, Priority, ServiceClient, ServiceQueue};
pub use prompts::PromptCatalog;
pub use validation::{ValidationPipeline, ValidationResult, ValidationSettings};
pub use workflow::{
    Session, SessionRegistry, StateHandler, WorkflowConfig, WorkflowContext, WorkflowError, WorkflowMachine,
    WorkflowState,
};
