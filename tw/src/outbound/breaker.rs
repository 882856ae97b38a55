//! Circuit breaker guarding one outbound service

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::error::OutboundError;

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    /// A probe is in flight; further half-open calls are rejected.
    probe_in_flight: bool,
    opened_at: Option<Instant>,
}

/// Per-service circuit breaker: closed → open on consecutive failures,
/// open → half-open after the reset timeout, half-open → closed on enough
/// probe successes (any probe failure reopens).
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                probe_in_flight: false,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Admit or reject a call. In half-open, only a single probe passes.
    pub fn check(&self) -> Result<(), OutboundError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.maybe_half_open(&mut inner);

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(OutboundError::CircuitOpen {
                        service: self.service.clone(),
                        retry_in: Duration::from_secs(1),
                    })
                } else {
                    inner.probe_in_flight = true;
                    debug!(service = %self.service, "breaker: admitting half-open probe");
                    Ok(())
                }
            }
            BreakerState::Open => {
                let retry_in = inner
                    .opened_at
                    .map(|at| self.config.reset_timeout.saturating_sub(at.elapsed()))
                    .unwrap_or(self.config.reset_timeout);
                Err(OutboundError::CircuitOpen {
                    service: self.service.clone(),
                    retry_in,
                })
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    debug!(service = %self.service, "breaker: closing after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures = inner.consecutive_failures,
                        "breaker: opening circuit"
                    );
                    self.open(&mut inner);
                }
            }
            BreakerState::HalfOpen => {
                warn!(service = %self.service, "breaker: probe failed, reopening");
                inner.probe_in_flight = false;
                self.open(&mut inner);
            }
            BreakerState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.half_open_successes = 0;
        inner.opened_at = Some(Instant::now());
    }

    /// Open → HalfOpen once the reset timeout has elapsed.
    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
        {
            debug!(service = %self.service, "breaker: reset timeout elapsed, half-open");
            inner.state = BreakerState::HalfOpen;
            inner.half_open_successes = 0;
            inner.probe_in_flight = false;
        }
    }
}
