//! Retry policy: exponential backoff and `Retry-After` handling

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Statuses the outbound client retries.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 503)
}

/// Bounds applied to a server-provided `Retry-After`.
pub const RETRY_AFTER_MIN: Duration = Duration::from_secs(1);
pub const RETRY_AFTER_MAX: Duration = Duration::from_secs(60);

/// Exponential backoff with jitter, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`
    /// plus uniform jitter, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.max_delay);
        let jitter_ms = if self.max_jitter.is_zero() {
            0
        } else {
            rand::rng().random_range(0..=self.max_jitter.as_millis() as u64)
        };
        capped + Duration::from_millis(jitter_ms)
    }

    /// Whether another retry is allowed after `attempt` retries already made.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Parse a `Retry-After` header value: either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Clamp a `Retry-After` duration to the accepted band.
pub fn clamp_retry_after(delay: Duration) -> Duration {
    delay.clamp(RETRY_AFTER_MIN, RETRY_AFTER_MAX)
}
