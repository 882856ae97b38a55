//! LlmClient trait and the chat-completions implementation

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::outbound::{OutboundError, ServiceClient};

use super::types::{CompletionRequest, CompletionResponse};

/// Errors from LLM calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Outbound(#[from] OutboundError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Outbound(OutboundError::Cancelled))
    }
}

/// Stateless chat-completion client. Each call is an independent
/// conversation; the workflow threads any needed context into the prompt.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError>;
}

/// OpenAI-compatible chat-completions client, routed through the
/// rate-limited outbound service so pacing, retry, and circuit breaking
/// apply uniformly to every persona.
pub struct ChatCompletionsClient {
    endpoint: String,
    model: String,
    service: ServiceClient,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, service: ServiceClient) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Self {
            endpoint,
            model: model.into(),
            service,
        }
    }

    fn url(&self) -> String {
        if self.endpoint.ends_with("/chat/completions") {
            self.endpoint.clone()
        } else {
            format!("{}/v1/chat/completions", self.endpoint)
        }
    }

    pub fn service(&self) -> &ServiceClient {
        &self.service
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        let body = request.to_body(&self.model);
        debug!(model = %self.model, messages = request.messages.len(), "llm: completing");

        let response = self
            .service
            .post_json(&self.url(), &body, request.priority, cancel)
            .await?;

        CompletionResponse::from_body(&response)
            .ok_or_else(|| LlmError::InvalidResponse("response carried no choices[0].message.content".into()))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted LLM client for unit tests: returns queued responses in order.
    pub struct MockLlmClient {
        responses: Mutex<Vec<CompletionResponse>>,
        calls: AtomicUsize,
    }

    impl MockLlmClient {
        pub fn new(contents: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(
                    contents
                        .into_iter()
                        .rev()
                        .map(|c| CompletionResponse { content: c.to_string() })
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(
            &self,
            _request: CompletionRequest,
            cancel: &CancellationToken,
        ) -> Result<CompletionResponse, LlmError> {
            if cancel.is_cancelled() {
                return Err(LlmError::Outbound(OutboundError::Cancelled));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::InvalidResponse("no more scripted responses".into()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_returns_in_order() {
            let mock = MockLlmClient::new(vec!["first", "second"]);
            let cancel = CancellationToken::new();

            let r1 = mock
                .complete(CompletionRequest::from_prompts("s", "u"), &cancel)
                .await
                .unwrap();
            assert_eq!(r1.content, "first");

            let r2 = mock
                .complete(CompletionRequest::from_prompts("s", "u"), &cancel)
                .await
                .unwrap();
            assert_eq!(r2.content, "second");
            assert_eq!(mock.call_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_errors_when_exhausted() {
            let mock = MockLlmClient::new(vec![]);
            let cancel = CancellationToken::new();
            let result = mock
                .complete(CompletionRequest::from_prompts("s", "u"), &cancel)
                .await;
            assert!(result.is_err());
        }
    }
}
