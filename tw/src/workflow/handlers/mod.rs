//! State handlers
//!
//! One handler per non-terminal state, each talking to the collaborators it
//! needs through the shared [`Services`] bundle. Handlers absorb item-local
//! problems into the context (`fail_item`); only fatal conditions surface
//! as `WorkflowError`.

mod execution;
mod item_loop;
mod mode;
mod planning;
mod selection;
mod summary;
mod verification;

pub use execution::ExecutionHandler;
pub use item_loop::ItemLoopHandler;
pub use mode::{ChatHandler, DevHandler, ModeSelectionHandler, StartHandler, TaskHandler};
pub use planning::{ContextEnrichmentHandler, TodoPlanningHandler};
pub use selection::{ServerSelectionHandler, ToolPlanningHandler};
pub use summary::FinalSummaryHandler;
pub use verification::{ReplanHandler, VerificationHandler};

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::history::{InspectionManager, SharedHistory};
use crate::llm::{CompletionRequest, LlmClient};
use crate::mcp::McpManager;
use crate::prompts::PromptCatalog;
use crate::validation::ValidationPipeline;

use super::context::WorkflowContext;
use super::error::WorkflowError;
use super::machine::WorkflowMachine;
use super::state::WorkflowState;

/// Collaborators shared by the handlers; assembled once by the composition
/// root and handed to [`register_all`].
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub mcp: Arc<McpManager>,
    pub pipeline: Arc<ValidationPipeline>,
    pub history: SharedHistory,
    pub inspectors: Arc<InspectionManager>,
    pub prompts: Arc<PromptCatalog>,
}

/// Register the full handler set on a machine.
pub fn register_all(machine: &mut WorkflowMachine, services: Arc<Services>) {
    machine.register(Box::new(StartHandler));
    machine.register(Box::new(ModeSelectionHandler::new(Arc::clone(&services))));
    machine.register(Box::new(ChatHandler::new(Arc::clone(&services))));
    machine.register(Box::new(DevHandler));
    machine.register(Box::new(TaskHandler));
    machine.register(Box::new(ContextEnrichmentHandler::new(Arc::clone(&services))));
    machine.register(Box::new(TodoPlanningHandler::new(Arc::clone(&services))));
    machine.register(Box::new(ItemLoopHandler));
    machine.register(Box::new(ServerSelectionHandler::new(Arc::clone(&services))));
    machine.register(Box::new(ToolPlanningHandler::new(Arc::clone(&services))));
    machine.register(Box::new(ExecutionHandler::new(Arc::clone(&services))));
    machine.register(Box::new(VerificationHandler::new(Arc::clone(&services))));
    machine.register(Box::new(ReplanHandler::new(Arc::clone(&services))));
    machine.register(Box::new(FinalSummaryHandler::new(services)));
}

/// Render a prompt and request a JSON completion.
///
/// `Ok(None)` means the model was reachable but returned nothing parseable;
/// callers choose between a fallback and `fail_item`. Transport errors map
/// to `HandlerError` except cancellation, which stays typed.
pub(super) async fn complete_json(
    services: &Services,
    state: WorkflowState,
    ctx: &WorkflowContext,
    prompt_id: &str,
    values: &[(&str, &str)],
) -> Result<Option<Value>, WorkflowError> {
    let prompt = services
        .prompts
        .render(prompt_id, values)
        .ok_or(WorkflowError::MissingContext("prompt"))?;

    let request = CompletionRequest::from_prompts(
        "You are a component of a task orchestrator. Answer with exactly the JSON object requested.",
        prompt,
    )
    .with_json_response();

    match services.llm.complete(request, &ctx.cancel).await {
        Ok(response) => {
            let parsed = response.content_as_json();
            if parsed.is_none() {
                warn!(%state, prompt_id, "handler: model returned no parseable JSON");
            }
            Ok(parsed)
        }
        Err(e) if e.is_cancelled() => Err(WorkflowError::Cancelled),
        Err(e) => Err(WorkflowError::HandlerError {
            state,
            message: e.to_string(),
            item_id: ctx.current_item_id.clone(),
        }),
    }
}

/// Plain-text completion variant for the chat and summary prompts.
pub(super) async fn complete_text(
    services: &Services,
    state: WorkflowState,
    ctx: &WorkflowContext,
    prompt_id: &str,
    values: &[(&str, &str)],
) -> Result<String, WorkflowError> {
    let prompt = services
        .prompts
        .render(prompt_id, values)
        .ok_or(WorkflowError::MissingContext("prompt"))?;

    let request = CompletionRequest::from_prompts("You are a helpful assistant.", prompt);
    match services.llm.complete(request, &ctx.cancel).await {
        Ok(response) => Ok(response.content),
        Err(e) if e.is_cancelled() => Err(WorkflowError::Cancelled),
        Err(e) => Err(WorkflowError::HandlerError {
            state,
            message: e.to_string(),
            item_id: ctx.current_item_id.clone(),
        }),
    }
}
