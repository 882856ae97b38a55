//! Shared context threaded through the state handlers
//!
//! Handlers communicate exclusively through this struct: each one validates
//! its preconditions over the context, does its work, and writes results
//! back for the next state.

use tokio_util::sync::CancellationToken;

use crate::domain::{ExecutionRecord, Item, Todo, ToolCall, VerificationRecord};
use crate::events::EventEmitter;
use crate::validation::ValidationResult;

use super::error::WorkflowError;
use super::state::Mode;

/// Mutable per-request workflow context.
pub struct WorkflowContext {
    pub session_id: String,
    pub user_message: String,
    /// Chosen by MODE_SELECTION.
    pub mode: Option<Mode>,
    /// Written by CONTEXT_ENRICHMENT.
    pub analysis: Option<String>,
    /// Created by TODO_PLANNING, mutated only through the machine.
    pub todo: Todo,
    /// Item currently moving through the inner cycle.
    pub current_item_id: Option<String>,
    /// Items that completed an inner cycle this run (pacing applies between
    /// them).
    pub items_processed: u32,
    /// Written by TOOL_PLANNING.
    pub planned_calls: Vec<ToolCall>,
    /// Written by EXECUTION.
    pub validation: Option<ValidationResult>,
    pub execution: Option<ExecutionRecord>,
    /// Short-circuit reason: set when an inner-cycle step failed and the
    /// remaining steps should fall through to VERIFICATION.
    pub item_failure: Option<String>,
    /// Written by VERIFICATION.
    pub verification: Option<VerificationRecord>,
    /// Written by FINAL_SUMMARY.
    pub summary: Option<String>,
    /// Developer mode authorization for this request.
    pub dev_authorized: bool,
    /// Set when DEV parked the session waiting for the password.
    pub awaiting_password: bool,
    pub emitter: EventEmitter,
    pub cancel: CancellationToken,
}

impl WorkflowContext {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        emitter: EventEmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_message: user_message.into(),
            mode: None,
            analysis: None,
            todo: Todo::default(),
            current_item_id: None,
            items_processed: 0,
            planned_calls: Vec::new(),
            validation: None,
            execution: None,
            item_failure: None,
            verification: None,
            summary: None,
            dev_authorized: false,
            awaiting_password: false,
            emitter,
            cancel,
        }
    }

    /// The current item, or a `MissingContext` error for handlers that
    /// require one.
    pub fn current_item(&self) -> Result<&Item, WorkflowError> {
        let id = self
            .current_item_id
            .as_deref()
            .ok_or(WorkflowError::MissingContext("current_item_id"))?;
        self.todo.get(id).ok_or(WorkflowError::MissingContext("current item"))
    }

    pub fn current_item_mut(&mut self) -> Result<&mut Item, WorkflowError> {
        let id = self
            .current_item_id
            .clone()
            .ok_or(WorkflowError::MissingContext("current_item_id"))?;
        self.todo
            .get_mut(&id)
            .ok_or(WorkflowError::MissingContext("current item"))
    }

    /// Reset the per-item scratch fields before a new inner cycle.
    pub fn begin_item(&mut self, item_id: String) {
        self.current_item_id = Some(item_id);
        self.planned_calls.clear();
        self.validation = None;
        self.execution = None;
        self.item_failure = None;
        self.verification = None;
    }

    /// Record an inner-cycle failure; later stages fall through to
    /// VERIFICATION, which routes the item into REPLAN.
    pub fn fail_item(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.item_failure.is_none() {
            self.item_failure = Some(reason);
        }
    }
}
