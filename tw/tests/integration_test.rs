//! End-to-end tests over the assembled orchestrator
//!
//! Drive full workflows with a scripted LLM and in-memory MCP servers:
//! happy path, tool-name auto-correction, and loop detection ahead of
//! execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use taskweave::events::{EventBus, Frame};
use taskweave::history::{HistoryEntry, InspectionManager, RepetitionInspector, ToolHistory};
use taskweave::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use taskweave::mcp::{Connector, McpConnection, McpError, McpManager, McpManagerConfig, McpServerConfig};
use taskweave::orchestrator::Orchestrator;
use taskweave::validation::{ValidationPipeline, ValidationSettings};
use taskweave::workflow::WorkflowConfig;
use taskweave::workflow::handlers::Services;
use taskweave::{ItemStatus, ToolCall};

// =============================================================================
// Scripted collaborators
// =============================================================================

/// LLM returning queued responses in order.
struct ScriptedLlm {
    responses: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _request: CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .map(|content| CompletionResponse { content })
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".into()))
    }
}

/// JSON-RPC server living on an in-memory pipe, advertising fixed tools.
async fn run_fake_server(
    io: tokio::io::DuplexStream,
    tools: Vec<(&'static str, Value)>,
) {
    let (read, mut write) = tokio::io::split(io);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(value) = serde_json::from_str::<Value>(&line) else { continue };
        let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
        let Some(id) = value.get("id").cloned() else { continue };

        let result = match method {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "fake", "version": "0.0.0" },
            }),
            "tools/list" => {
                let tools: Vec<Value> = tools
                    .iter()
                    .map(|(name, schema)| {
                        json!({ "name": name, "description": "test tool", "inputSchema": schema })
                    })
                    .collect();
                json!({ "tools": tools })
            }
            "tools/call" => {
                let name = value.pointer("/params/name").and_then(Value::as_str).unwrap_or("?");
                json!({ "content": [{ "type": "text", "text": format!("executed {name}") }] })
            }
            _ => continue,
        };

        let mut frame = json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string();
        frame.push('\n');
        if write.write_all(frame.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Connector handing out fake servers by name.
struct FakeConnector {
    servers: HashMap<String, Vec<(&'static str, Value)>>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, server: &str, _config: &McpServerConfig) -> Result<McpConnection, McpError> {
        let tools = self.servers.get(server).cloned().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            message: "unknown fake server".into(),
        })?;

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_fake_server(server_io, tools));
        let (read, write) = tokio::io::split(client_io);
        Ok(McpConnection::from_streams(server, read, write, None))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    orchestrator: Orchestrator,
    frames: tokio::sync::broadcast::Receiver<Frame>,
}

async fn harness(
    llm: Arc<ScriptedLlm>,
    servers: HashMap<String, Vec<(&'static str, Value)>>,
    history: Arc<ToolHistory>,
) -> Harness {
    let mcp = McpManager::with_connector(
        McpManagerConfig {
            request_timeout: Duration::from_secs(2),
            reconnect_base: Duration::from_millis(10),
            ..Default::default()
        },
        Box::new(FakeConnector {
            servers: servers.clone(),
        }),
    );
    for name in servers.keys() {
        mcp.add_server(name, McpServerConfig::default()).await.unwrap();
    }

    let settings = ValidationSettings::default();
    let pipeline = ValidationPipeline::standard(
        Arc::clone(&history),
        Arc::new(Arc::clone(&mcp)),
        &settings,
    );

    let mut inspectors = InspectionManager::new();
    inspectors.register(Box::new(RepetitionInspector::new(Arc::clone(&history))));

    let services = Arc::new(Services {
        llm,
        mcp: Arc::clone(&mcp),
        pipeline: Arc::new(pipeline),
        history,
        inspectors: Arc::new(inspectors),
        prompts: Arc::new(taskweave::PromptCatalog::embedded()),
    });

    let events = Arc::new(EventBus::with_default_capacity());
    let frames = events.subscribe();
    let orchestrator = Orchestrator::with_services(
        services,
        WorkflowConfig {
            handler_timeout: Duration::from_secs(5),
            pacing_delay: Duration::ZERO,
            ..Default::default()
        },
        Duration::from_secs(600),
        events,
        mcp,
    );

    Harness { orchestrator, frames }
}

fn drain_frames(rx: &mut tokio::sync::broadcast::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn filesystem_server() -> HashMap<String, Vec<(&'static str, Value)>> {
    let mut servers = HashMap::new();
    servers.insert(
        "filesystem".to_string(),
        vec![(
            "filesystem_list_directory",
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        )],
    );
    servers
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_happy_path_list_and_summarize() {
    let llm = ScriptedLlm::new(&[
        r#"{"mode": "task"}"#,
        "The user wants a listing of /tmp plus a short summary.",
        r#"{"items": [{"action": "list /tmp and summarize"}]}"#,
        r#"{"servers": ["filesystem"]}"#,
        r#"{"tool_calls": [{"server": "filesystem", "tool": "filesystem__list_directory", "parameters": {"path": "/tmp"}}]}"#,
        r#"{"verified": true, "explanation": "directory listing returned"}"#,
        "Listed /tmp and summarized the contents.",
    ]);
    let history = ToolHistory::shared(100);
    let mut h = harness(llm, filesystem_server(), Arc::clone(&history)).await;

    let session_id = h
        .orchestrator
        .handle_message(None, "list the files in /tmp and summarize")
        .await;

    let frames = drain_frames(&mut h.frames);
    let types: Vec<&str> = frames.iter().map(Frame::frame_type).collect();
    assert!(types.contains(&"tool_started"));
    assert!(types.contains(&"tool_result"));
    assert!(types.contains(&"verification"));
    assert!(types.contains(&"summary"));
    assert_eq!(*types.last().unwrap(), "done");

    // The executed call succeeded and kept its canonical name
    let tool_result = frames
        .iter()
        .find_map(|f| match f {
            Frame::ToolResult { tool, success, output, .. } => Some((tool.clone(), *success, output.clone())),
            _ => None,
        })
        .expect("tool_result frame present");
    assert_eq!(tool_result.0, "filesystem__list_directory");
    assert!(tool_result.1);
    assert!(tool_result.2.contains("executed filesystem_list_directory"));

    // The item completed and its verification agrees
    let session = h.orchestrator.sessions().get(&session_id).await.unwrap();
    let session = session.lock().await;
    let todo = session.todo.as_ref().unwrap();
    let item = &todo.items()[0];
    assert_eq!(item.status, ItemStatus::Completed);
    assert!(item.last_verification.as_ref().unwrap().verified);

    // The execution landed in the shared history
    assert_eq!(history.len(), 1);
    assert_eq!(history.success_rate("filesystem", "filesystem__list_directory"), Some(1.0));
}

#[tokio::test]
async fn test_tool_name_auto_correction() {
    // The planner emits playwright__navigate; only browser_navigate exists
    let llm = ScriptedLlm::new(&[
        r#"{"mode": "task"}"#,
        "analysis",
        r#"{"items": [{"action": "open the page"}]}"#,
        r#"{"servers": ["playwright"]}"#,
        r#"{"tool_calls": [{"server": "playwright", "tool": "playwright__navigate", "parameters": {"url": "https://x"}}]}"#,
        r#"{"verified": true, "explanation": "page opened"}"#,
        "Opened the page.",
    ]);

    let mut servers = HashMap::new();
    servers.insert(
        "playwright".to_string(),
        vec![(
            "playwright_browser_navigate",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        )],
    );

    let history = ToolHistory::shared(100);
    let mut h = harness(llm, servers, history).await;
    h.orchestrator.handle_message(None, "open https://x").await;

    let frames = drain_frames(&mut h.frames);
    let started = frames
        .iter()
        .find_map(|f| match f {
            Frame::ToolStarted { tool, .. } => Some(tool.clone()),
            _ => None,
        })
        .expect("tool_started frame present");
    // The corrected canonical name reached execution
    assert_eq!(started, "playwright__browser_navigate");

    let result_success = frames.iter().any(|f| matches!(f, Frame::ToolResult { success: true, .. }));
    assert!(result_success, "corrected call should execute successfully");
}

#[tokio::test]
async fn test_loop_detection_denies_fourth_attempt() {
    // Three identical failures already in history; the planner tries the
    // same call a fourth time
    let history = ToolHistory::shared(100);
    let mut params = serde_json::Map::new();
    params.insert("selector".into(), json!("#submit"));
    let failing = ToolCall::new("playwright", "playwright__click", params);
    for _ in 0..3 {
        history.record(HistoryEntry::from_call(&failing, false, 10, Some("no such element".into())));
    }

    let llm = ScriptedLlm::new(&[
        r#"{"mode": "task"}"#,
        "analysis",
        r#"{"items": [{"action": "click submit"}]}"#,
        r#"{"servers": ["playwright"]}"#,
        r##"{"tool_calls": [{"server": "playwright", "tool": "playwright__click", "parameters": {"selector": "#submit"}}]}"##,
        // Verification is skipped (the failure short-circuits); REPLAN runs:
        r#"{"decision": "skip"}"#,
        "Could not click the button; skipped that step.",
    ]);

    let mut servers = HashMap::new();
    servers.insert(
        "playwright".to_string(),
        vec![("playwright_click", json!({"type": "object"}))],
    );

    let mut h = harness(llm, servers, Arc::clone(&history)).await;
    let session_id = h.orchestrator.handle_message(None, "click submit").await;

    let frames = drain_frames(&mut h.frames);

    // The call never executed: no tool_started frame, history unchanged
    assert!(!frames.iter().any(|f| matches!(f, Frame::ToolStarted { .. })));
    assert_eq!(history.len(), 3);

    // Verification reported the block and REPLAN skipped the item
    let verification = frames
        .iter()
        .find_map(|f| match f {
            Frame::Verification { verified, explanation, .. } => Some((*verified, explanation.clone())),
            _ => None,
        })
        .expect("verification frame present");
    assert!(!verification.0);
    assert!(verification.1.contains("loop detected"));

    let session = h.orchestrator.sessions().get(&session_id).await.unwrap();
    let session = session.lock().await;
    let todo = session.todo.as_ref().unwrap();
    assert_eq!(todo.items()[0].status, ItemStatus::Skipped);

    // The run still closed with a summary and done
    let types: Vec<&str> = frames.iter().map(Frame::frame_type).collect();
    assert!(types.contains(&"summary"));
    assert_eq!(*types.last().unwrap(), "done");
}

#[tokio::test]
async fn test_chat_mode_answers_directly() {
    let llm = ScriptedLlm::new(&[r#"{"mode": "chat"}"#, "Hello there!"]);
    let history = ToolHistory::shared(100);
    let mut h = harness(llm, filesystem_server(), history).await;

    h.orchestrator.handle_message(Some("chat-1"), "hi").await;

    let frames = drain_frames(&mut h.frames);
    let message = frames
        .iter()
        .find_map(|f| match f {
            Frame::AgentMessage { message, .. } => Some(message.clone()),
            _ => None,
        })
        .expect("agent_message frame present");
    assert_eq!(message, "Hello there!");
    assert!(!frames.iter().any(|f| matches!(f, Frame::ToolStarted { .. })));
}

#[tokio::test]
async fn test_llm_failure_surfaces_error_frame() {
    // Mode selection works, then the script runs dry mid-run
    let llm = ScriptedLlm::new(&[r#"{"mode": "task"}"#, "analysis"]);
    let history = ToolHistory::shared(100);
    let mut h = harness(llm, filesystem_server(), history).await;

    h.orchestrator.handle_message(Some("s-err"), "do something").await;

    let frames = drain_frames(&mut h.frames);
    let error = frames
        .iter()
        .find_map(|f| match f {
            Frame::Error { kind, .. } => Some(kind.clone()),
            _ => None,
        })
        .expect("error frame present");
    assert_eq!(error, "handler_error");
    // A plain-language explanation accompanies the typed frame
    assert!(frames.iter().any(|f| matches!(f, Frame::AgentMessage { .. })));
    assert_eq!(*frames.iter().map(Frame::frame_type).collect::<Vec<_>>().last().unwrap(), "done");
}
