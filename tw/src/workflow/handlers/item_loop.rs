//! ITEM_LOOP: pick the next runnable item or close out the run

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{ItemStatus, SelectionOutcome};
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::WorkflowState;

/// Selects the next pending item whose dependencies are complete, applying
/// the inter-item pacing delay and the blocked-check skip policy. When
/// nothing runnable remains, hands over to FINAL_SUMMARY.
pub struct ItemLoopHandler;

#[async_trait]
impl StateHandler for ItemLoopHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::ItemLoop
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        // Bounded: every ineligible pass advances blocked counters, so the
        // loop drains even in the presence of dependency cycles
        let mut passes = 0u32;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            match ctx.todo.select_next(config.blocked_check_limit) {
                Ok(item_id) => {
                    if ctx.items_processed > 0 && !config.pacing_delay.is_zero() {
                        debug!(session_id = %ctx.session_id, delay = ?config.pacing_delay, "item loop: pacing");
                        tokio::select! {
                            _ = tokio::time::sleep(config.pacing_delay) => {}
                            _ = ctx.cancel.cancelled() => return Err(WorkflowError::Cancelled),
                        }
                    }
                    ctx.items_processed += 1;

                    ctx.begin_item(item_id.clone());
                    let action = {
                        let item = ctx.current_item_mut()?;
                        item.set_status(ItemStatus::InProgress);
                        item.attempt_count += 1;
                        item.action.clone()
                    };
                    debug!(session_id = %ctx.session_id, item_id = %item_id, "item loop: starting item");
                    ctx.emitter.status("item_loop", format!("working on: {action}"));
                    return Ok(HandlerOutcome::next(WorkflowState::ServerSelection));
                }
                Err(SelectionOutcome::AllSettled) => {
                    debug!(session_id = %ctx.session_id, "item loop: all items settled");
                    return Ok(HandlerOutcome::next(WorkflowState::FinalSummary));
                }
                Err(SelectionOutcome::NoneEligible) => {
                    passes += 1;
                    if passes > config.blocked_check_limit {
                        // Defensive bound: nothing runnable is left to unblock
                        debug!(session_id = %ctx.session_id, "item loop: no progress possible, summarizing");
                        return Ok(HandlerOutcome::next(WorkflowState::FinalSummary));
                    }
                }
            }
        }
    }
}
