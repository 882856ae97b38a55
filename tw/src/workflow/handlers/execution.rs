//! EXECUTION: validate the plan, then run it against the MCP servers

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{ExecutionRecord, ToolOutcome};
use crate::history::{HistoryEntry, InspectionDecision};
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::WorkflowState;

use super::Services;

/// Runs the validated plan call by call. Every call passes the validation
/// pipeline (as a batch) and the pre-flight inspectors; executions are
/// recorded into the shared history and streamed as frames. The first
/// failing call stops the batch and routes the item toward REPLAN via a
/// failed verification.
pub struct ExecutionHandler {
    services: Arc<Services>,
}

impl ExecutionHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StateHandler for ExecutionHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::Execution
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if ctx.item_failure.is_some() {
            return Ok(HandlerOutcome::next(WorkflowState::Verification));
        }

        let item_id = ctx
            .current_item_id
            .clone()
            .ok_or(WorkflowError::MissingContext("current_item_id"))?;
        let planned = ctx.planned_calls.clone();

        // Batch validation with auto-correction
        let validation = self.services.pipeline.validate(&planned).await;
        ctx.validation = Some(validation.clone());
        if !validation.valid {
            let first = validation
                .errors
                .first()
                .map(|e| format!("{}: {}", e.stage, e.message))
                .unwrap_or_else(|| "validation failed".to_string());
            let stage = validation.rejected_at.as_deref().unwrap_or("unknown");
            warn!(session_id = %ctx.session_id, stage, "execution: plan rejected by validation");
            ctx.emitter
                .status("execution", format!("plan rejected at {stage}: {first}"));
            ctx.fail_item(format!("validation rejected the plan ({first})"));
            return Ok(HandlerOutcome::next(WorkflowState::Verification));
        }
        for correction in &validation.corrections {
            debug!(session_id = %ctx.session_id, ?correction.kind, detail = %correction.detail, "execution: correction applied");
        }

        let calls = validation.effective_calls(&planned).to_vec();
        let started_at = Utc::now();
        let mut outcomes: Vec<ToolOutcome> = Vec::new();

        for call in &calls {
            if ctx.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            // Pre-flight repetition guards
            match self.services.inspectors.inspect(call) {
                InspectionDecision::Allow => {}
                InspectionDecision::Deny { reason } => {
                    warn!(session_id = %ctx.session_id, tool = %call.tool, %reason, "execution: denied");
                    ctx.emitter.status("execution", format!("blocked: {reason}"));
                    outcomes.push(ToolOutcome {
                        tool: call.tool.clone(),
                        success: false,
                        output: format!("blocked before execution: {reason}"),
                        duration_ms: 0,
                    });
                    ctx.fail_item(reason);
                    break;
                }
                InspectionDecision::RequireApproval { reason } => {
                    // No interactive approval channel exists here; surface
                    // the request and stop rather than plough ahead
                    ctx.emitter
                        .agent_message(format!("This step needs approval before I continue: {reason}"));
                    outcomes.push(ToolOutcome {
                        tool: call.tool.clone(),
                        success: false,
                        output: format!("approval required: {reason}"),
                        duration_ms: 0,
                    });
                    ctx.fail_item(format!("approval required: {reason}"));
                    break;
                }
            }

            ctx.emitter
                .tool_started(&item_id, &call.tool, Value::Object(call.parameters.clone()));
            let call_start = Instant::now();
            let (success, output, error) = match self.services.mcp.call(call).await {
                Ok(result) if result.is_error => (false, result.text.clone(), Some(result.text)),
                Ok(result) => (true, result.text, None),
                Err(e) => (false, e.to_string(), Some(e.to_string())),
            };
            let duration_ms = call_start.elapsed().as_millis() as u64;

            self.services
                .history
                .record(HistoryEntry::from_call(call, success, duration_ms, error));
            ctx.emitter
                .tool_result(&item_id, &call.tool, success, &output, duration_ms);
            outcomes.push(ToolOutcome {
                tool: call.tool.clone(),
                success,
                output: output.clone(),
                duration_ms,
            });

            if !success {
                let brief: String = output.chars().take(200).collect();
                ctx.fail_item(format!("{} failed: {brief}", call.tool));
                break;
            }
        }

        let record = ExecutionRecord {
            tool_calls: calls,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };
        ctx.current_item_mut()?.last_execution = Some(record.clone());
        ctx.execution = Some(record);
        Ok(HandlerOutcome::next(WorkflowState::Verification))
    }
}
