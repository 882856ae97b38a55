//! Entry handlers: start, mode selection, chat, dev, task

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::{Mode, WorkflowState};

use super::{Services, complete_json, complete_text};

/// WORKFLOW_START: announce the run and move to mode selection.
pub struct StartHandler;

#[async_trait]
impl StateHandler for StartHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::WorkflowStart
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        ctx.emitter.status("workflow_start", "processing request");
        Ok(HandlerOutcome::next(WorkflowState::ModeSelection))
    }
}

/// MODE_SELECTION: classify the message into chat, task, or dev.
pub struct ModeSelectionHandler {
    services: Arc<Services>,
}

impl ModeSelectionHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StateHandler for ModeSelectionHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::ModeSelection
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let message = ctx.user_message.clone();
        let verdict = complete_json(
            &self.services,
            self.state(),
            ctx,
            "mode_selection",
            &[("message", message.as_str())],
        )
        .await?;

        let mode = verdict
            .as_ref()
            .and_then(|v| v.get("mode"))
            .and_then(Value::as_str)
            .and_then(Mode::parse)
            .unwrap_or_else(|| {
                warn!(session_id = %ctx.session_id, "mode selection unparseable, defaulting to chat");
                Mode::Chat
            });

        debug!(session_id = %ctx.session_id, ?mode, "mode selected");
        ctx.emitter.status("mode_selection", format!("mode: {mode:?}").to_lowercase());
        ctx.mode = Some(mode);
        Ok(HandlerOutcome::next(mode.entry_state()))
    }
}

/// CHAT: answer directly and end the workflow.
pub struct ChatHandler {
    services: Arc<Services>,
}

impl ChatHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StateHandler for ChatHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::Chat
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let message = ctx.user_message.clone();
        let reply = complete_text(&self.services, self.state(), ctx, "chat", &[("message", message.as_str())]).await?;
        ctx.emitter.agent_message(reply);
        Ok(HandlerOutcome::next(WorkflowState::WorkflowEnd))
    }
}

/// DEV: password-gated developer mode.
///
/// Without authorization the handler parks the session (`awaiting_password`)
/// and ends the run; the next message re-enters here, and a correct password
/// takes the DEV -> DEV self-loop before continuing into TASK.
pub struct DevHandler;

#[async_trait]
impl StateHandler for DevHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::Dev
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if ctx.dev_authorized {
            ctx.emitter.status("dev", "developer mode active");
            return Ok(HandlerOutcome::next(WorkflowState::Task));
        }

        let Some(password) = config.dev_password.as_deref() else {
            ctx.emitter.agent_message("Developer mode is not enabled on this deployment.");
            return Ok(HandlerOutcome::next(WorkflowState::WorkflowEnd));
        };

        if ctx.awaiting_password && ctx.user_message.trim() == password {
            debug!(session_id = %ctx.session_id, "dev password accepted");
            ctx.dev_authorized = true;
            ctx.awaiting_password = false;
            // Continuation signal received: re-execute DEV authorized
            return Ok(HandlerOutcome::next(WorkflowState::Dev));
        }

        ctx.awaiting_password = true;
        ctx.emitter
            .agent_message("Developer mode requires the intervention password. Send it to continue.");
        Ok(HandlerOutcome::next(WorkflowState::WorkflowEnd))
    }
}

/// TASK: acknowledged; hand over to context enrichment.
pub struct TaskHandler;

#[async_trait]
impl StateHandler for TaskHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::Task
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        ctx.emitter.status("task", "analyzing the request");
        Ok(HandlerOutcome::next(WorkflowState::ContextEnrichment))
    }
}
