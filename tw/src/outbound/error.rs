//! Outbound layer error types

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the rate-limited outbound client.
#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("burst limit reached for {service}, retry after {retry_after:?}")]
    RateLimitExceeded { service: String, retry_after: Duration },

    #[error("request queued on {service} timed out after {waited:?}")]
    QueueTimeout { service: String, waited: Duration },

    #[error("queue for {service} is full ({depth} waiting)")]
    QueueOverflow { service: String, depth: usize },

    #[error("circuit open for {service}, retry in {retry_in:?}")]
    CircuitOpen { service: String, retry_in: Duration },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request cancelled")]
    Cancelled,
}

impl OutboundError {
    /// Whether a retry could possibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OutboundError::Http { status, .. } => super::retry::is_retryable_status(*status),
            OutboundError::Network(_) => true,
            OutboundError::RateLimitExceeded { .. } => true,
            OutboundError::QueueTimeout { .. }
            | OutboundError::QueueOverflow { .. }
            | OutboundError::CircuitOpen { .. }
            | OutboundError::InvalidResponse(_)
            | OutboundError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(
            OutboundError::Http {
                status: 429,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            OutboundError::Http {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !OutboundError::Http {
                status: 400,
                message: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_terminal_errors_not_retryable() {
        assert!(!OutboundError::Cancelled.is_retryable());
        assert!(
            !OutboundError::CircuitOpen {
                service: "llm".into(),
                retry_in: Duration::from_secs(60)
            }
            .is_retryable()
        );
    }
}
