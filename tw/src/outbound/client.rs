//! Resilient HTTP client for one outbound service
//!
//! Composes the service queue, the circuit breaker, and the retry policy
//! around a `reqwest` client. Every call flows: breaker check → queue permit
//! → HTTP → retry decision. `Retry-After` from 429/503 responses is honored
//! (clamped); other retryable failures back off exponentially.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use super::error::OutboundError;
use super::queue::{QueueConfig, QueueStats, ServiceQueue};
use super::retry::{RetryPolicy, clamp_retry_after, is_retryable_status, parse_retry_after};
use super::Priority;

/// Full configuration for one outbound service client.
#[derive(Debug, Clone, Default)]
pub struct ServiceClientConfig {
    pub queue: QueueConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Bearer token attached when present.
    pub api_key: Option<String>,
    /// Header carrying the token (default `Authorization`).
    pub auth_header: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

impl ServiceClientConfig {
    /// Defaults for a chat-completions style service: one call in flight,
    /// 60 s request timeout.
    pub fn llm_defaults() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            ..Default::default()
        }
    }
}

/// Rate-limited, breaker-guarded HTTP client for a single service.
pub struct ServiceClient {
    service: String,
    http: reqwest::Client,
    queue: ServiceQueue,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    api_key: Option<String>,
    auth_header: String,
    referer: Option<String>,
    title: Option<String>,
}

impl ServiceClient {
    pub fn new(service: impl Into<String>, config: ServiceClientConfig) -> Self {
        let service = service.into();
        let timeout = if config.request_timeout.is_zero() {
            Duration::from_secs(60)
        } else {
            config.request_timeout
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            queue: ServiceQueue::new(service.clone(), config.queue),
            breaker: CircuitBreaker::new(service.clone(), config.breaker),
            retry: config.retry,
            http,
            api_key: config.api_key,
            auth_header: config.auth_header.unwrap_or_else(|| "Authorization".to_string()),
            referer: config.referer,
            title: config.title,
            service,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// POST a JSON body and decode the JSON response, with queueing, retry,
    /// and circuit breaking. Cancellation is observed at every suspension
    /// point; an in-flight request is aborted by dropping its future.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<Value, OutboundError> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(OutboundError::Cancelled);
            }
            self.breaker.check()?;

            let permit = tokio::select! {
                permit = self.queue.acquire(priority) => permit?,
                _ = cancel.cancelled() => return Err(OutboundError::Cancelled),
            };

            debug!(service = %self.service, attempt, %url, "outbound: sending");
            let send = self.build_request(url, body).send();
            let outcome = tokio::select! {
                result = send => result,
                _ = cancel.cancelled() => {
                    drop(permit);
                    return Err(OutboundError::Cancelled);
                }
            };
            drop(permit);

            let delay = match outcome {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        self.breaker.on_success();
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| OutboundError::InvalidResponse(e.to_string()));
                    }

                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after)
                        .map(clamp_retry_after);
                    let message = response.text().await.unwrap_or_default();
                    self.breaker.on_failure();
                    warn!(service = %self.service, status, attempt, "outbound: HTTP failure");

                    if !(is_retryable_status(status) && self.retry.can_retry(attempt)) {
                        return Err(OutboundError::Http { status, message });
                    }
                    retry_after.unwrap_or_else(|| self.retry.backoff_delay(attempt))
                }
                Err(e) => {
                    self.breaker.on_failure();
                    warn!(service = %self.service, attempt, error = %e, "outbound: network failure");
                    if !self.retry.can_retry(attempt) {
                        return Err(OutboundError::Network(e));
                    }
                    self.retry.backoff_delay(attempt)
                }
            };

            attempt += 1;
            debug!(service = %self.service, attempt, ?delay, "outbound: backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(OutboundError::Cancelled),
            }
        }
    }

    fn build_request(&self, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            let value = if self.auth_header.eq_ignore_ascii_case("authorization") {
                format!("Bearer {key}")
            } else {
                key.clone()
            };
            request = request.header(self.auth_header.as_str(), value);
        }
        if let Some(referer) = &self.referer {
            request = request.header("referer", referer.as_str());
        }
        if let Some(title) = &self.title {
            request = request.header("x-title", title.as_str());
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one scripted HTTP/1.1 response per connection, then stop.
    async fn scripted_server(responses: Vec<String>) -> (String, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut served = 0;
            for response in responses {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let mut buf = [0u8; 4096];
                // Read the request head; bodies here are small enough to fit
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
                served += 1;
            }
            served
        });
        (format!("http://{addr}/v1/chat/completions"), handle)
    }

    fn http_response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    fn fast_client(max_retries: u32) -> ServiceClient {
        ServiceClient::new("llm", ServiceClientConfig {
            queue: QueueConfig {
                min_delay: Duration::ZERO,
                burst_limit: 0,
                ..Default::default()
            },
            retry: RetryPolicy {
                max_retries,
                base: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                max_jitter: Duration::ZERO,
            },
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_success_returns_json() {
        let (url, _server) = scripted_server(vec![http_response(
            "200 OK",
            "content-type: application/json\r\n",
            r#"{"ok":true}"#,
        )])
        .await;

        let client = fast_client(0);
        let cancel = CancellationToken::new();
        let value = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap();
        assert_eq!(value["ok"], serde_json::Value::Bool(true));
        assert_eq!(client.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_retries_429_honoring_retry_after() {
        let (url, _server) = scripted_server(vec![
            http_response("429 Too Many Requests", "retry-after: 1\r\n", ""),
            http_response("200 OK", "content-type: application/json\r\n", r#"{"ok":1}"#),
        ])
        .await;

        let client = fast_client(3);
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();
        let value = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap();
        assert_eq!(value["ok"], serde_json::json!(1));
        // Retry-After: 1 clamps to one full second before the second attempt
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_non_retryable_status_propagates() {
        let (url, _server) =
            scripted_server(vec![http_response("400 Bad Request", "", "bad payload")]).await;

        let client = fast_client(3);
        let cancel = CancellationToken::new();
        let err = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap_err();
        match err {
            OutboundError::Http { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("bad payload"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_original_error() {
        let responses = (0..4)
            .map(|_| http_response("500 Internal Server Error", "", "boom"))
            .collect();
        let (url, _server) = scripted_server(responses).await;

        let client = fast_client(3);
        let cancel = CancellationToken::new();
        let err = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OutboundError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_breaker_opens_after_consecutive_failures() {
        let responses = (0..5)
            .map(|_| http_response("500 Internal Server Error", "", "boom"))
            .collect();
        let (url, _server) = scripted_server(responses).await;

        let client = fast_client(6);
        let cancel = CancellationToken::new();
        let err = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap_err();
        // Five failures trip the breaker before the retry budget runs out
        assert!(matches!(err, OutboundError::CircuitOpen { .. }));
        assert_eq!(client.breaker_state(), BreakerState::Open);

        // And further calls fail fast without touching the network
        let err = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OutboundError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_before_send() {
        let (url, _server) = scripted_server(vec![]).await;
        let client = fast_client(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .post_json(&url, &serde_json::json!({}), Priority::Normal, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OutboundError::Cancelled));
    }
}
