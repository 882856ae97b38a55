//! Per-service request queue: priority FIFO, concurrency cap, pacing, bursts
//!
//! One `ServiceQueue` exists per logical outbound service. Callers acquire a
//! permit before sending; the permit enforces the concurrency cap, the
//! minimum inter-request delay, and the burst window, and releases its slot
//! on drop. The queue is the single back-pressure point toward the service:
//! past the depth cap, submissions fail fast instead of piling up.

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

use super::Priority;
use super::error::OutboundError;

/// Queue tuning per service.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Max requests in flight at once.
    pub max_concurrent: usize,
    /// Minimum delay between consecutive request starts.
    pub min_delay: Duration,
    /// Max starts inside `burst_window`. Zero disables the burst guard.
    pub burst_limit: usize,
    pub burst_window: Duration,
    /// Waiting + in-flight cap; beyond it submissions overflow.
    pub max_depth: usize,
    /// How long a caller may sit in the queue.
    pub queue_timeout: Duration,
    /// When true, a full burst window errors instead of waiting it out.
    pub burst_errors: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            min_delay: Duration::from_secs(1),
            burst_limit: 10,
            burst_window: Duration::from_secs(10),
            max_depth: 32,
            queue_timeout: Duration::from_secs(30),
            burst_errors: false,
        }
    }
}

/// Counters exposed for status reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub started: u64,
    pub completed: u64,
    pub overflowed: u64,
    pub rate_limited: u64,
    pub timed_out: u64,
    pub peak_waiting: usize,
    pub peak_in_flight: usize,
}

type WaiterKey = (Reverse<Priority>, u64);

struct QueueInner {
    /// Waiters ordered by (priority desc, arrival asc); `first()` runs next.
    waiting: BTreeSet<WaiterKey>,
    next_seq: u64,
    in_flight: usize,
    last_start: Option<Instant>,
    /// Start times inside the burst window, oldest first.
    starts: VecDeque<Instant>,
    stats: QueueStats,
}

struct QueueShared {
    service: String,
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

/// Slot held while a request is in flight; releasing it promotes waiters.
pub struct Permit {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().expect("queue lock poisoned");
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.stats.completed += 1;
        drop(inner);
        self.shared.notify.notify_waiters();
    }
}

/// Rate-limiting queue for one outbound service.
#[derive(Clone)]
pub struct ServiceQueue {
    shared: Arc<QueueShared>,
}

impl ServiceQueue {
    pub fn new(service: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                service: service.into(),
                config,
                inner: Mutex::new(QueueInner {
                    waiting: BTreeSet::new(),
                    next_seq: 0,
                    in_flight: 0,
                    last_start: None,
                    starts: VecDeque::new(),
                    stats: QueueStats::default(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.inner.lock().expect("queue lock poisoned").stats
    }

    /// Current queue depth (waiting callers).
    pub fn depth(&self) -> usize {
        self.shared.inner.lock().expect("queue lock poisoned").waiting.len()
    }

    /// Wait for a slot under the service's pacing rules.
    pub async fn acquire(&self, priority: Priority) -> Result<Permit, OutboundError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.queue_timeout;

        // Enqueue, or overflow immediately at the depth cap
        let key: WaiterKey = {
            let mut inner = shared.inner.lock().expect("queue lock poisoned");
            let depth = inner.waiting.len() + inner.in_flight;
            if depth >= shared.config.max_depth {
                inner.stats.overflowed += 1;
                debug!(service = %shared.service, depth, "queue: overflow");
                return Err(OutboundError::QueueOverflow {
                    service: shared.service.clone(),
                    depth: inner.waiting.len(),
                });
            }
            let key = (Reverse(priority), inner.next_seq);
            inner.next_seq += 1;
            inner.waiting.insert(key);
            inner.stats.peak_waiting = inner.stats.peak_waiting.max(inner.waiting.len());
            key
        };

        loop {
            // Try to start; on success we are done
            let wait_hint = {
                let mut inner = shared.inner.lock().expect("queue lock poisoned");
                match self.try_start(&mut inner, &key) {
                    StartAttempt::Started => {
                        return Ok(Permit {
                            shared: Arc::clone(shared),
                        });
                    }
                    StartAttempt::BurstRejected { retry_after } => {
                        inner.waiting.remove(&key);
                        inner.stats.rate_limited += 1;
                        return Err(OutboundError::RateLimitExceeded {
                            service: shared.service.clone(),
                            retry_after,
                        });
                    }
                    StartAttempt::WaitUntil(at) => Some(at),
                    StartAttempt::NotEligible => None,
                }
            };

            let now = Instant::now();
            if now >= deadline {
                let mut inner = shared.inner.lock().expect("queue lock poisoned");
                inner.waiting.remove(&key);
                inner.stats.timed_out += 1;
                return Err(OutboundError::QueueTimeout {
                    service: shared.service.clone(),
                    waited: shared.config.queue_timeout,
                });
            }

            let sleep_until = wait_hint.unwrap_or(deadline).min(deadline);
            tokio::select! {
                _ = shared.notify.notified() => {}
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(sleep_until)) => {}
            }
        }
    }

    fn try_start(&self, inner: &mut QueueInner, key: &WaiterKey) -> StartAttempt {
        let config = &self.shared.config;
        let now = Instant::now();

        // Drop burst-window entries that aged out
        while inner
            .starts
            .front()
            .is_some_and(|t| now.duration_since(*t) >= config.burst_window)
        {
            inner.starts.pop_front();
        }

        if inner.waiting.iter().next() != Some(key) || inner.in_flight >= config.max_concurrent {
            return StartAttempt::NotEligible;
        }

        let mut earliest = now;
        if let Some(last) = inner.last_start {
            earliest = earliest.max(last + config.min_delay);
        }
        if config.burst_limit > 0 && inner.starts.len() >= config.burst_limit {
            let burst_free = inner.starts[0] + config.burst_window;
            if config.burst_errors {
                return StartAttempt::BurstRejected {
                    retry_after: burst_free.saturating_duration_since(now),
                };
            }
            earliest = earliest.max(burst_free);
        }

        if earliest > now {
            return StartAttempt::WaitUntil(earliest);
        }

        inner.waiting.remove(key);
        inner.in_flight += 1;
        inner.last_start = Some(now);
        inner.starts.push_back(now);
        inner.stats.started += 1;
        inner.stats.peak_in_flight = inner.stats.peak_in_flight.max(inner.in_flight);
        StartAttempt::Started
    }
}

enum StartAttempt {
    Started,
    NotEligible,
    WaitUntil(Instant),
    BurstRejected { retry_after: Duration },
}
