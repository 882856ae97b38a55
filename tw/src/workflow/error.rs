//! Workflow error taxonomy

use std::time::Duration;

use thiserror::Error;

use super::state::WorkflowState;

/// Errors raised by the state machine and its handlers.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid transition {from} -> {to} (allowed: {allowed:?})")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
        allowed: &'static [WorkflowState],
    },

    #[error("no handler registered for state {0}")]
    HandlerNotFound(WorkflowState),

    #[error("handler for {state} failed: {message}")]
    HandlerError {
        state: WorkflowState,
        message: String,
        item_id: Option<String>,
    },

    #[error("handler for {state} exceeded {timeout:?}")]
    HandlerTimeout { state: WorkflowState, timeout: Duration },

    #[error("transition out of {state} exceeded {timeout:?}")]
    TransitionTimeout { state: WorkflowState, timeout: Duration },

    #[error("context is missing required field '{0}'")]
    MissingContext(&'static str),

    #[error("session cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Machine-readable kind for the error frame on the event stream.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::InvalidTransition { .. } => "invalid_transition",
            WorkflowError::HandlerNotFound(_) => "handler_not_found",
            WorkflowError::HandlerError { .. } => "handler_error",
            WorkflowError::HandlerTimeout { .. } => "handler_timeout",
            WorkflowError::TransitionTimeout { .. } => "transition_timeout",
            WorkflowError::MissingContext(_) => "missing_context",
            WorkflowError::Cancelled => "cancelled",
        }
    }

    /// Session-fatal errors end the run without a summary.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WorkflowError::HandlerError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_carries_allowed_set() {
        let err = WorkflowError::InvalidTransition {
            from: WorkflowState::ModeSelection,
            to: WorkflowState::Execution,
            allowed: WorkflowState::ModeSelection.allowed_next(),
        };
        let text = err.to_string();
        assert!(text.contains("mode_selection"));
        assert!(text.contains("execution"));
        assert!(text.contains("Chat"));
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn test_fatality() {
        assert!(
            WorkflowError::InvalidTransition {
                from: WorkflowState::Chat,
                to: WorkflowState::Task,
                allowed: &[],
            }
            .is_fatal()
        );
        assert!(
            !WorkflowError::HandlerError {
                state: WorkflowState::ToolPlanning,
                message: "llm hiccup".into(),
                item_id: None,
            }
            .is_fatal()
        );
    }
}
