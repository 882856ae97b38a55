//! VERIFICATION and REPLAN handlers

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Item, ItemStatus, VerificationRecord};
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::WorkflowState;

use super::{Services, complete_json};

/// VERIFICATION: decide whether the current item is genuinely complete.
///
/// Short-circuited failures (validation rejection, denied or failed calls)
/// verify false without consulting the model. A clean execution is judged
/// by the verifier persona; only a verified item is marked `completed`.
pub struct VerificationHandler {
    services: Arc<Services>,
}

impl VerificationHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StateHandler for VerificationHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::Verification
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let item_id = ctx
            .current_item_id
            .clone()
            .ok_or(WorkflowError::MissingContext("current_item_id"))?;

        let record = if let Some(reason) = ctx.item_failure.clone() {
            VerificationRecord {
                verified: false,
                explanation: reason,
            }
        } else {
            match &ctx.execution {
                Some(execution) if execution.all_succeeded() => {
                    let action = ctx.current_item()?.action.clone();
                    let results = serde_json::to_string_pretty(&execution.outcomes).unwrap_or_default();
                    self.judge(ctx, &action, &results).await?
                }
                Some(_) => VerificationRecord {
                    verified: false,
                    explanation: "one or more tool calls failed".to_string(),
                },
                None => VerificationRecord {
                    verified: false,
                    explanation: "nothing was executed for this item".to_string(),
                },
            }
        };

        debug!(
            session_id = %ctx.session_id,
            item_id = %item_id,
            verified = record.verified,
            "verification complete"
        );
        ctx.emitter
            .verification(&item_id, record.verified, &record.explanation);
        ctx.verification = Some(record.clone());
        let verified = record.verified;
        {
            let item = ctx.current_item_mut()?;
            item.last_verification = Some(record);
            if verified {
                item.set_status(ItemStatus::Completed);
            }
        }

        if verified {
            Ok(HandlerOutcome::next(WorkflowState::ItemLoop))
        } else {
            Ok(HandlerOutcome::next(WorkflowState::Replan))
        }
    }
}

impl VerificationHandler {
    async fn judge(
        &self,
        ctx: &WorkflowContext,
        action: &str,
        results: &str,
    ) -> Result<VerificationRecord, WorkflowError> {
        let verdict = complete_json(
            &self.services,
            WorkflowState::Verification,
            ctx,
            "verification",
            &[("action", action), ("results", results)],
        )
        .await;

        match verdict {
            Ok(Some(value)) => {
                let verified = value.get("verified").and_then(Value::as_bool).unwrap_or(false);
                let explanation = value
                    .get("explanation")
                    .and_then(Value::as_str)
                    .unwrap_or("no explanation given")
                    .to_string();
                Ok(VerificationRecord { verified, explanation })
            }
            Ok(None) => Ok(VerificationRecord {
                verified: false,
                explanation: "verifier returned no parseable verdict".to_string(),
            }),
            Err(WorkflowError::Cancelled) => Err(WorkflowError::Cancelled),
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "verifier unavailable");
                Ok(VerificationRecord {
                    verified: false,
                    explanation: format!("verifier unavailable: {e}"),
                })
            }
        }
    }
}

/// REPLAN: decide what to do with a failed item - retry it, skip it, or
/// replace it with new items inserted right after it.
pub struct ReplanHandler {
    services: Arc<Services>,
}

impl ReplanHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn parse_replacement_items(value: &Value, max_attempts: u32) -> Vec<Item> {
        value
            .get("items")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("action").and_then(Value::as_str))
                    .map(|action| {
                        let mut item = Item::new(action);
                        item.max_attempts = max_attempts;
                        item
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateHandler for ReplanHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::Replan
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let item_id = ctx
            .current_item_id
            .clone()
            .ok_or(WorkflowError::MissingContext("current_item_id"))?;
        let (action, attempts_remaining) = {
            let item = ctx.current_item()?;
            (item.action.clone(), item.attempts_remaining())
        };
        let failure = ctx
            .verification
            .as_ref()
            .map(|v| v.explanation.clone())
            .or_else(|| ctx.item_failure.clone())
            .unwrap_or_else(|| "verification failed".to_string());

        let verdict = complete_json(
            &self.services,
            self.state(),
            ctx,
            "replan",
            &[("action", action.as_str()), ("failure", failure.as_str())],
        )
        .await;

        let (decision, replacement) = match verdict {
            Ok(Some(value)) => {
                let decision = value
                    .get("decision")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let items = Self::parse_replacement_items(&value, config.default_max_attempts);
                (decision, items)
            }
            Err(WorkflowError::Cancelled) => return Err(WorkflowError::Cancelled),
            _ => {
                warn!(session_id = %ctx.session_id, "replanner unavailable, applying retry/fail policy");
                (String::new(), Vec::new())
            }
        };

        match decision.as_str() {
            "skip" => {
                debug!(session_id = %ctx.session_id, item_id = %item_id, "replan: skip_and_continue");
                ctx.emitter.status("replan", format!("skipping: {action}"));
                ctx.current_item_mut()?.skip("skip_and_continue");
            }
            "replace" if !replacement.is_empty() => {
                debug!(
                    session_id = %ctx.session_id,
                    item_id = %item_id,
                    children = replacement.len(),
                    "replan: replacing item"
                );
                ctx.emitter
                    .status("replan", format!("replanned into {} new item(s)", replacement.len()));
                if !ctx.todo.replan(&item_id, replacement) {
                    ctx.current_item_mut()?.fail(format!("replan failed: {failure}"));
                }
            }
            "retry" if attempts_remaining => {
                debug!(session_id = %ctx.session_id, item_id = %item_id, "replan: retrying");
                ctx.emitter.status("replan", format!("retrying: {action}"));
                ctx.current_item_mut()?.set_status(ItemStatus::Pending);
            }
            _ => {
                // No usable decision (or retry budget exhausted): retry if
                // the budget allows, otherwise the item fails
                if attempts_remaining {
                    debug!(session_id = %ctx.session_id, item_id = %item_id, "replan: defaulting to retry");
                    ctx.current_item_mut()?.set_status(ItemStatus::Pending);
                } else {
                    debug!(session_id = %ctx.session_id, item_id = %item_id, "replan: attempts exhausted");
                    ctx.emitter.status("replan", format!("giving up on: {action}"));
                    ctx.current_item_mut()?.fail(failure);
                }
            }
        }

        ctx.current_item_id = None;
        Ok(HandlerOutcome::next(WorkflowState::ItemLoop))
    }
}
