//! Chat-completion request/response types
//!
//! The planner, executor, and verifier personas all speak the same
//! OpenAI-compatible chat-completions dialect; they differ only in which
//! prompts they send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outbound::Priority;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Requested response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    /// Ask the model for a strict JSON object.
    JsonObject,
}

/// A single completion request. Each call is independent; no conversation
/// state is kept between calls.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
    /// Queue priority on the LLM service.
    pub priority: Priority,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
            priority: Priority::Normal,
        }
    }

    /// Convenience: a system prompt plus one user message.
    pub fn from_prompts(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }

    pub fn with_json_response(mut self) -> Self {
        self.response_format = Some(ResponseFormat::JsonObject);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Serialize to the chat-completions body for `model`.
    pub fn to_body(&self, model: &str) -> Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": self.messages,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }
        if matches!(self.response_format, Some(ResponseFormat::JsonObject)) {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

/// Parsed completion response: the assistant text of the first choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
}

impl CompletionResponse {
    /// Extract the first choice's message content from a raw response body.
    pub fn from_body(body: &Value) -> Option<Self> {
        let content = body
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()?
            .to_string();
        Some(Self { content })
    }

    /// Parse the content as JSON, tolerating markdown code fences the model
    /// sometimes wraps around object output.
    pub fn content_as_json(&self) -> Option<Value> {
        let trimmed = self.content.trim();
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Some(value);
        }
        let stripped = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))?
            .strip_suffix("```")?
            .trim();
        serde_json::from_str(stripped).ok()
    }
}
