//! LLM access for the planner, executor, and verifier personas

mod client;
mod types;

pub use client::{ChatCompletionsClient, LlmClient, LlmError};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, ResponseFormat, Role};

#[cfg(test)]
pub use client::mock;
