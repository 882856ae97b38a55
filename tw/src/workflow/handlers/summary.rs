//! FINAL_SUMMARY: wrap the run up for the user

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::WorkflowState;

use super::{Services, complete_text};

/// Summarizes item outcomes. The model writes the prose; if it is
/// unavailable a plain tally is emitted instead, so the run always ends
/// with a summary frame.
pub struct FinalSummaryHandler {
    services: Arc<Services>,
}

impl FinalSummaryHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn outcomes_listing(ctx: &WorkflowContext) -> String {
        let mut listing = String::new();
        for item in ctx.todo.items() {
            listing.push_str(&format!("- {} [{}]", item.action, item.status));
            if let Some(reason) = &item.status_reason {
                listing.push_str(&format!(" ({reason})"));
            }
            listing.push('\n');
        }
        listing
    }

    fn fallback_text(ctx: &WorkflowContext) -> String {
        let counts = ctx.todo.status_counts();
        format!(
            "Finished: {} completed, {} failed, {} skipped, {} replanned.",
            counts.completed, counts.failed, counts.skipped, counts.replanned
        )
    }
}

#[async_trait]
impl StateHandler for FinalSummaryHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::FinalSummary
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let message = ctx.user_message.clone();
        let outcomes = Self::outcomes_listing(ctx);

        let text = match complete_text(
            &self.services,
            self.state(),
            ctx,
            "final_summary",
            &[("message", message.as_str()), ("outcomes", outcomes.as_str())],
        )
        .await
        {
            Ok(text) => text,
            Err(WorkflowError::Cancelled) => return Err(WorkflowError::Cancelled),
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "summary model unavailable, using tally");
                Self::fallback_text(ctx)
            }
        };

        ctx.emitter.summary(text.clone(), ctx.todo.status_counts());
        ctx.emitter.agent_message(text.clone());
        ctx.summary = Some(text);
        Ok(HandlerOutcome::next(WorkflowState::WorkflowEnd))
    }
}
