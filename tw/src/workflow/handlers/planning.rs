//! Pre-loop handlers: context enrichment and todo planning

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Item, Todo};
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::WorkflowState;

use super::{Services, complete_json, complete_text};

/// CONTEXT_ENRICHMENT: analyze the request before planning. Best-effort;
/// an unusable analysis never blocks the run.
pub struct ContextEnrichmentHandler {
    services: Arc<Services>,
}

impl ContextEnrichmentHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StateHandler for ContextEnrichmentHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::ContextEnrichment
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let message = ctx.user_message.clone();
        let history = self.services.history.format_for_prompt(10);

        match complete_text(
            &self.services,
            self.state(),
            ctx,
            "context_enrichment",
            &[("message", message.as_str()), ("history", history.as_str())],
        )
        .await
        {
            Ok(analysis) => {
                debug!(session_id = %ctx.session_id, "analysis captured");
                ctx.analysis = Some(analysis);
            }
            Err(WorkflowError::Cancelled) => return Err(WorkflowError::Cancelled),
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "context enrichment unavailable");
            }
        }
        Ok(HandlerOutcome::next(WorkflowState::TodoPlanning))
    }
}

/// TODO_PLANNING: break the request into ordered items with dependencies.
pub struct TodoPlanningHandler {
    services: Arc<Services>,
}

impl TodoPlanningHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Decode `{"items": [{"action", "dependencies": [indices]}]}`.
    /// Dependencies are 0-based indices into the list; out-of-range or
    /// self-referential entries are dropped so every dependency names an
    /// existing item.
    fn parse_items(value: &Value, max_attempts: u32) -> Vec<Item> {
        let Some(entries) = value.get("items").and_then(Value::as_array) else {
            return Vec::new();
        };

        // Entries without an action are dropped; the index map keeps the
        // planner's dependency indices pointing at the right items anyway
        let mut items: Vec<Item> = Vec::new();
        let mut entry_to_item: Vec<Option<usize>> = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.get("action").and_then(Value::as_str) {
                Some(action) => {
                    entry_to_item.push(Some(items.len()));
                    let mut item = Item::new(action);
                    item.max_attempts = max_attempts;
                    items.push(item);
                }
                None => entry_to_item.push(None),
            }
        }

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        for (entry_index, entry) in entries.iter().enumerate() {
            let Some(Some(item_index)) = entry_to_item.get(entry_index).copied() else {
                continue;
            };
            let deps = entry
                .get("dependencies")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for dep in deps {
                let target = dep
                    .as_u64()
                    .and_then(|d| entry_to_item.get(d as usize).copied().flatten());
                if let Some(target) = target {
                    if target != item_index {
                        items[item_index].dependencies.insert(ids[target].clone());
                    }
                }
            }
        }
        items
    }
}

#[async_trait]
impl StateHandler for TodoPlanningHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::TodoPlanning
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        let message = ctx.user_message.clone();
        let analysis = ctx.analysis.clone().unwrap_or_default();

        let plan = complete_json(
            &self.services,
            self.state(),
            ctx,
            "todo_planning",
            &[("message", message.as_str()), ("analysis", analysis.as_str())],
        )
        .await?;

        let items = plan
            .as_ref()
            .map(|v| Self::parse_items(v, config.default_max_attempts))
            .unwrap_or_default();

        if items.is_empty() {
            return Err(WorkflowError::HandlerError {
                state: self.state(),
                message: "planner produced an empty todo".into(),
                item_id: None,
            });
        }

        debug!(session_id = %ctx.session_id, items = items.len(), "todo planned");
        ctx.emitter
            .status("todo_planning", format!("planned {} item(s)", items.len()));
        ctx.todo = Todo::new(items);
        Ok(HandlerOutcome::next(WorkflowState::ItemLoop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_items_with_dependencies() {
        let value = json!({
            "items": [
                {"action": "fetch the page"},
                {"action": "summarize it", "dependencies": [0]},
            ]
        });
        let items = TodoPlanningHandler::parse_items(&value, 2);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].action, "fetch the page");
        assert_eq!(items[1].dependencies.len(), 1);
        assert!(items[1].dependencies.contains(&items[0].id));
        assert_eq!(items[0].max_attempts, 2);
    }

    #[test]
    fn test_parse_items_drops_bad_dependencies() {
        let value = json!({
            "items": [
                {"action": "a", "dependencies": [0, 5, 1]},
                {"action": "b"},
            ]
        });
        let items = TodoPlanningHandler::parse_items(&value, 1);
        // Self-reference (0) and out-of-range (5) dropped; only index 1 kept
        assert_eq!(items[0].dependencies.len(), 1);
        assert!(items[0].dependencies.contains(&items[1].id));
    }

    #[test]
    fn test_parse_items_empty_or_malformed() {
        assert!(TodoPlanningHandler::parse_items(&json!({}), 1).is_empty());
        assert!(TodoPlanningHandler::parse_items(&json!({"items": []}), 1).is_empty());
        assert!(TodoPlanningHandler::parse_items(&json!({"items": [{"no_action": 1}]}), 1).is_empty());
    }
}
