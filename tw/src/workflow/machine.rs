//! The workflow state machine
//!
//! Drives a context through the transition table: look up the handler for
//! the current state, run it under the handler timeout, validate the
//! transition it chose, record it, repeat until a terminal state. The
//! machine owns no domain logic; everything interesting happens in the
//! handlers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::context::WorkflowContext;
use super::error::WorkflowError;
use super::session::TransitionRecord;
use super::state::WorkflowState;

/// Machine tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Ceiling on each handler invocation (and the transition it picks).
    pub handler_timeout: Duration,
    /// Minimum delay between items in the loop.
    pub pacing_delay: Duration,
    /// Blocked-dependency checks before an item is force-skipped.
    pub blocked_check_limit: u32,
    /// Execution attempts per item unless the planner overrides.
    pub default_max_attempts: u32,
    /// Intervention password gating DEV mode, when configured.
    pub dev_password: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            pacing_delay: Duration::from_secs(3),
            blocked_check_limit: 10,
            default_max_attempts: 1,
            dev_password: None,
        }
    }
}

/// What a handler returns: the state to move to next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub next: WorkflowState,
}

impl HandlerOutcome {
    pub fn next(next: WorkflowState) -> Self {
        Self { next }
    }
}

/// One registered state handler.
///
/// Handlers must be idempotent on their inputs: re-running one over the
/// same context produces the same effect modulo external nondeterminism.
/// Item-local problems are recorded via `WorkflowContext::fail_item`, not
/// returned as errors; an `Err` from a handler ends the session.
#[async_trait]
pub trait StateHandler: Send + Sync {
    fn state(&self) -> WorkflowState;
    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError>;
}

/// The deterministic coordinator.
pub struct WorkflowMachine {
    handlers: HashMap<WorkflowState, Box<dyn StateHandler>>,
    config: WorkflowConfig,
}

impl WorkflowMachine {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Register a handler under the state it declares.
    pub fn register(&mut self, handler: Box<dyn StateHandler>) {
        let state = handler.state();
        debug!(%state, "machine: registering handler");
        self.handlers.insert(state, handler);
    }

    /// Run the context from `start` until a terminal state, appending every
    /// accepted transition to `transitions`.
    pub async fn run(
        &self,
        ctx: &mut WorkflowContext,
        start: WorkflowState,
        transitions: &mut Vec<TransitionRecord>,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = start;

        while !state.is_terminal() {
            if ctx.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            let handler = self
                .handlers
                .get(&state)
                .ok_or(WorkflowError::HandlerNotFound(state))?;

            debug!(session_id = %ctx.session_id, %state, "machine: entering state");
            let cancel = ctx.cancel.clone();
            let outcome = tokio::select! {
                result = tokio::time::timeout(self.config.handler_timeout, handler.handle(ctx, &self.config)) => {
                    match result {
                        Ok(outcome) => outcome?,
                        Err(_) => {
                            warn!(%state, timeout = ?self.config.handler_timeout, "machine: handler timed out");
                            return Err(WorkflowError::HandlerTimeout {
                                state,
                                timeout: self.config.handler_timeout,
                            });
                        }
                    }
                }
                _ = cancel.cancelled() => return Err(WorkflowError::Cancelled),
            };

            let next = outcome.next;
            if !state.can_transition_to(next) {
                // Rejected: no state change, nothing recorded
                return Err(WorkflowError::InvalidTransition {
                    from: state,
                    to: next,
                    allowed: state.allowed_next(),
                });
            }

            debug!(session_id = %ctx.session_id, from = %state, to = %next, "machine: transition");
            transitions.push(TransitionRecord {
                from: state,
                to: next,
                at: Utc::now(),
            });
            state = next;
        }

        Ok(state)
    }
}
