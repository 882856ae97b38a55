//! Rate-limited, resilient outbound API layer
//!
//! All HTTP traffic to upstream services (LLM, TTS, vision) goes through a
//! [`ServiceClient`], which composes a per-service [`ServiceQueue`] for
//! pacing and back-pressure, a [`CircuitBreaker`], and a [`RetryPolicy`].

mod breaker;
mod client;
mod error;
mod queue;
mod retry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use client::{ServiceClient, ServiceClientConfig};
pub use error::OutboundError;
pub use queue::{Permit, QueueConfig, QueueStats, ServiceQueue};
pub use retry::{RetryPolicy, clamp_retry_after, is_retryable_status, parse_retry_after};

use serde::{Deserialize, Serialize};

/// Request priority inside a service queue. Higher dequeues first; ties are
/// served in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
