//! Stage 5 (optional): LLM safety review of the planned batch
//!
//! Sends the batch to an external model and asks for a verdict. The stage
//! is non-critical and degrades gracefully: an unreachable model becomes a
//! warning, never a rejection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::ToolCall;
use crate::llm::{CompletionRequest, LlmClient};
use crate::validation::result::StageOutcome;
use crate::validation::Validator;

pub struct LlmValidator {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmValidator {
    pub fn new(client: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
        }
    }

    fn render_batch(calls: &[ToolCall]) -> String {
        serde_json::to_string_pretty(calls).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl Validator for LlmValidator {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn validate(&self, calls: &[ToolCall]) -> StageOutcome {
        let mut outcome = StageOutcome::default();

        let request = CompletionRequest::from_prompts(
            self.system_prompt.clone(),
            format!(
                "Review the following planned tool calls and answer with a JSON object \
                 {{\"approved\": bool, \"concerns\": [string]}}.\n\n{}",
                Self::render_batch(calls)
            ),
        )
        .with_json_response();

        let cancel = CancellationToken::new();
        let response = match self.client.complete(request, &cancel).await {
            Ok(response) => response,
            Err(e) => {
                outcome.warnings.push(format!("safety review unavailable: {e}"));
                return outcome;
            }
        };

        let Some(verdict) = response.content_as_json() else {
            outcome.warnings.push("safety review returned no parseable verdict".to_string());
            return outcome;
        };

        let approved = verdict.get("approved").and_then(Value::as_bool).unwrap_or(true);
        let concerns: Vec<String> = verdict
            .get("concerns")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        debug!(approved, concerns = concerns.len(), "llm validator verdict");
        if approved {
            outcome.warnings.extend(concerns);
        } else if concerns.is_empty() {
            outcome.errors.push("safety review rejected the batch".to_string());
        } else {
            outcome.errors.extend(concerns);
        }
        outcome
    }
}
