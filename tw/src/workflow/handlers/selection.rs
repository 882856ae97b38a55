//! Inner-cycle planning handlers: server selection and tool planning

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::ToolCall;
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::machine::{HandlerOutcome, StateHandler, WorkflowConfig};
use crate::workflow::state::WorkflowState;

use super::{Services, complete_json};

/// SERVER_SELECTION: choose which MCP servers the current item needs.
/// Falls back to every configured server when the model's choice is
/// unusable; an item only fails here when no servers exist at all.
pub struct ServerSelectionHandler {
    services: Arc<Services>,
}

impl ServerSelectionHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn server_listing(&self) -> String {
        let mut listing = String::new();
        for name in self.services.mcp.server_names() {
            let tools = match self.services.mcp.tools(&name).await {
                Ok(tools) => tools
                    .iter()
                    .map(|t| t.name.clone())
                    .collect::<Vec<_>>()
                    .join(", "),
                Err(_) => "(unavailable)".to_string(),
            };
            listing.push_str(&format!("- {name}: {tools}\n"));
        }
        listing
    }
}

#[async_trait]
impl StateHandler for ServerSelectionHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::ServerSelection
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if ctx.item_failure.is_some() {
            return Ok(HandlerOutcome::next(WorkflowState::ToolPlanning));
        }

        let known = self.services.mcp.server_names();
        if known.is_empty() {
            ctx.fail_item("no MCP servers are configured");
            return Ok(HandlerOutcome::next(WorkflowState::ToolPlanning));
        }

        let action = ctx.current_item()?.action.clone();
        let listing = self.server_listing().await;
        let choice = complete_json(
            &self.services,
            self.state(),
            ctx,
            "server_selection",
            &[("servers", listing.as_str()), ("action", action.as_str())],
        )
        .await;

        let mut selected: Vec<String> = match &choice {
            Ok(Some(value)) => value
                .get("servers")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|name| known.iter().any(|k| k == name))
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if let Err(e) = choice {
            if matches!(e, WorkflowError::Cancelled) {
                return Err(WorkflowError::Cancelled);
            }
            warn!(session_id = %ctx.session_id, error = %e, "server selection model call failed");
        }

        if selected.is_empty() {
            debug!(session_id = %ctx.session_id, "server selection fell back to all servers");
            selected = known;
        }

        ctx.emitter
            .status("server_selection", format!("servers: {}", selected.join(", ")));
        let item = ctx.current_item_mut()?;
        item.selected_servers = selected;
        item.selected_prompts = vec!["tool_planning".to_string()];
        Ok(HandlerOutcome::next(WorkflowState::ToolPlanning))
    }
}

/// TOOL_PLANNING: produce the concrete tool calls for the current item.
pub struct ToolPlanningHandler {
    services: Arc<Services>,
}

impl ToolPlanningHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Render the catalog of the selected servers for the prompt.
    async fn catalog_listing(&self, servers: &[String]) -> String {
        let mut listing = String::new();
        for server in servers {
            let Ok(tools) = self.services.mcp.tools(server).await else {
                continue;
            };
            listing.push_str(&format!("Server '{server}':\n"));
            for tool in tools {
                let description = tool.description.as_deref().unwrap_or("");
                let schema = serde_json::to_string(&tool.input_schema).unwrap_or_default();
                listing.push_str(&format!("  - {} {description}\n    schema: {schema}\n", tool.name));
            }
        }
        listing
    }

    /// Decode the optional `"tts"` phrase list.
    fn parse_tts(value: &Value) -> Vec<String> {
        value
            .get("tts")
            .and_then(Value::as_array)
            .map(|phrases| {
                phrases
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decode `{"tool_calls": [{server, tool, parameters}]}`.
    fn parse_calls(value: &Value) -> Vec<ToolCall> {
        value
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let server = entry.get("server").and_then(Value::as_str)?;
                        let tool = entry.get("tool").and_then(Value::as_str)?;
                        let parameters = entry
                            .get("parameters")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default();
                        Some(ToolCall::new(server, tool, parameters))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateHandler for ToolPlanningHandler {
    fn state(&self) -> WorkflowState {
        WorkflowState::ToolPlanning
    }

    async fn handle(
        &self,
        ctx: &mut WorkflowContext,
        _config: &WorkflowConfig,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if ctx.item_failure.is_some() {
            return Ok(HandlerOutcome::next(WorkflowState::Execution));
        }

        let (action, servers) = {
            let item = ctx.current_item()?;
            (item.action.clone(), item.selected_servers.clone())
        };
        let catalog = self.catalog_listing(&servers).await;
        let history = self.services.history.format_for_prompt(10);

        let plan = complete_json(
            &self.services,
            self.state(),
            ctx,
            "tool_planning",
            &[("catalog", catalog.as_str()), ("history", history.as_str()), ("action", action.as_str())],
        )
        .await;

        let (calls, tts) = match plan {
            Ok(Some(value)) => (Self::parse_calls(&value), Self::parse_tts(&value)),
            Ok(None) => (Vec::new(), Vec::new()),
            Err(WorkflowError::Cancelled) => return Err(WorkflowError::Cancelled),
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "tool planning model call failed");
                ctx.fail_item(format!("tool planning failed: {e}"));
                return Ok(HandlerOutcome::next(WorkflowState::Execution));
            }
        };

        if calls.is_empty() {
            ctx.fail_item("planner produced no tool calls for this item");
            return Ok(HandlerOutcome::next(WorkflowState::Execution));
        }

        debug!(session_id = %ctx.session_id, calls = calls.len(), "tool plan ready");
        ctx.emitter.status(
            "tool_planning",
            format!(
                "planned {} call(s): {}",
                calls.len(),
                calls.iter().map(|c| c.tool.clone()).collect::<Vec<_>>().join(", ")
            ),
        );
        {
            let item = ctx.current_item_mut()?;
            item.last_plan = Some(calls.clone());
            item.tts_phrases = tts;
        }
        ctx.planned_calls = calls;
        Ok(HandlerOutcome::next(WorkflowState::Execution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_calls() {
        let value = json!({
            "tool_calls": [
                {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "/tmp"}},
                {"server": "playwright", "tool": "playwright__navigate", "parameters": {"url": "https://x"}},
            ]
        });
        let calls = ToolPlanningHandler::parse_calls(&value);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool, "filesystem__list_directory");
        assert_eq!(calls[1].tool, "playwright__navigate");
        assert_eq!(calls[0].parameters["path"], json!("/tmp"));
    }

    #[test]
    fn test_parse_calls_skips_malformed_entries() {
        let value = json!({
            "tool_calls": [
                {"tool": "missing_server"},
                {"server": "fs", "tool": "ok"},
            ]
        });
        let calls = ToolPlanningHandler::parse_calls(&value);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "fs__ok");
    }

    #[test]
    fn test_parse_calls_empty() {
        assert!(ToolPlanningHandler::parse_calls(&json!({})).is_empty());
    }

    #[test]
    fn test_parse_tts_phrases() {
        let value = json!({"tool_calls": [], "tts": ["opening the page", "clicking submit"]});
        assert_eq!(
            ToolPlanningHandler::parse_tts(&value),
            vec!["opening the page".to_string(), "clicking submit".to_string()]
        );
        assert!(ToolPlanningHandler::parse_tts(&json!({})).is_empty());
    }
}
