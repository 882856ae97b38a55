//! Composition root
//!
//! Wires the collaborators together - history, outbound LLM client, MCP
//! manager, validation pipeline, inspectors, prompts, machine, sessions -
//! and exposes the narrow API the web layer drives: subscribe to frames,
//! hand in messages, cancel sessions, shut down. Dependencies are built
//! here and passed into constructors; nothing reaches for globals.

use std::sync::Arc;

use eyre::{WrapErr, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::events::{EventBus, Frame};
use crate::history::{InspectionManager, RepetitionInspector, ToolHistory};
use crate::llm::ChatCompletionsClient;
use crate::mcp::{McpManager, McpManagerConfig};
use crate::outbound::{ServiceClient, ServiceClientConfig};
use crate::prompts::PromptCatalog;
use crate::validation::{ValidationPipeline, ValidationSettings};
use crate::validation::stages::LlmValidator;
use crate::workflow::handlers::{Services, register_all};
use crate::workflow::{
    SessionRegistry, WorkflowConfig, WorkflowContext, WorkflowError, WorkflowMachine, WorkflowState,
};

/// The assembled core. One per daemon process.
pub struct Orchestrator {
    machine: WorkflowMachine,
    sessions: Arc<SessionRegistry>,
    events: Arc<EventBus>,
    mcp: Arc<McpManager>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build everything from configuration and connect the MCP servers.
    ///
    /// Individual server failures are tolerated (they surface as `dead`
    /// in status output); failing to connect a single one of several is
    /// not fatal, but configured servers all being unreachable is.
    pub async fn start(config: &Config) -> eyre::Result<Self> {
        let events = crate::events::create_event_bus();
        let history = ToolHistory::shared(config.validation.history_max_size);

        let llm_service = ServiceClient::new("llm", ServiceClientConfig {
            queue: config.outbound.llm_queue(),
            breaker: config.outbound.breaker(),
            retry: config.outbound.retry(),
            request_timeout: config.llm.request_timeout(),
            api_key: config.llm.resolve_api_key(),
            auth_header: Some(config.llm.auth_header.clone()),
            referer: config.llm.referer.clone(),
            title: config.llm.title.clone(),
        });
        let llm = Arc::new(ChatCompletionsClient::new(
            config.llm.endpoint.clone(),
            config.llm.model.clone(),
            llm_service,
        ));

        let mcp = McpManager::new(McpManagerConfig {
            request_timeout: config.mcp.request_timeout(),
            catalog_ttl: config.validation.mcp_cache_ttl(),
            reconnect_attempts: config.mcp.reconnect_attempts,
            reconnect_base: config.mcp.reconnect_base(),
        });

        let mut connected = 0usize;
        for (name, server_config) in &config.mcp.servers {
            match mcp.add_server(name, server_config.clone()).await {
                Ok(()) => connected += 1,
                Err(e) if e.is_permission_denied() => {
                    return Err(eyre!("spawning MCP server '{name}' needs OS permissions: {e}"))
                        .wrap_err("permission denied");
                }
                Err(e) => {
                    error!(server = %name, error = %e, "orchestrator: MCP server failed to start");
                }
            }
        }
        if !config.mcp.servers.is_empty() && connected == 0 {
            return Err(eyre!("no MCP server could be started"));
        }
        info!(connected, configured = config.mcp.servers.len(), "orchestrator: MCP servers up");

        let settings = config.validation.settings();
        let mut pipeline = ValidationPipeline::standard(
            Arc::clone(&history),
            Arc::new(Arc::clone(&mcp)),
            &settings,
        );
        let prompts = Arc::new(match &config.prompt_dir {
            Some(dir) => PromptCatalog::with_overrides(dir),
            None => PromptCatalog::embedded(),
        });
        if config.validation.llm_stage {
            let safety_prompt = prompts
                .get("validation_safety")
                .unwrap_or_default()
                .to_string();
            pipeline.push_stage(Box::new(LlmValidator::new(llm.clone(), safety_prompt)));
        }

        let mut inspectors = InspectionManager::new();
        inspectors.register(Box::new(RepetitionInspector::with_limits(
            Arc::clone(&history),
            config.validation.consecutive_limit,
            config.validation.total_call_limit,
        )));

        let services = Arc::new(Services {
            llm,
            mcp: Arc::clone(&mcp),
            pipeline: Arc::new(pipeline),
            history,
            inspectors: Arc::new(inspectors),
            prompts,
        });

        Ok(Self::with_services(
            services,
            config.workflow.machine_config(),
            config.workflow.session_idle_timeout(),
            events,
            mcp,
        ))
    }

    /// Assemble from pre-built services. Tests use this with mock
    /// collaborators.
    pub fn with_services(
        services: Arc<Services>,
        workflow_config: WorkflowConfig,
        session_idle_timeout: std::time::Duration,
        events: Arc<EventBus>,
        mcp: Arc<McpManager>,
    ) -> Self {
        let mut machine = WorkflowMachine::new(workflow_config);
        register_all(&mut machine, services);

        let sessions = SessionRegistry::new(session_idle_timeout);
        let shutdown = CancellationToken::new();
        sessions.spawn_sweeper(std::time::Duration::from_secs(60), shutdown.clone());

        Self {
            machine,
            sessions,
            events,
            mcp,
            shutdown,
        }
    }

    /// Subscribe to the frame stream (the web layer's SSE source).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Frame> {
        self.events.subscribe()
    }

    pub fn mcp(&self) -> &Arc<McpManager> {
        &self.mcp
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Process one user message. Returns the session id (created when the
    /// caller passed none). Frames stream on the bus throughout; a `done`
    /// frame always closes the request.
    pub async fn handle_message(&self, session_id: Option<&str>, message: &str) -> String {
        let session_id = session_id
            .map(String::from)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let session = self.sessions.get_or_create(&session_id).await;
        let mut session = session.lock().await;
        session.touch();

        // A cancelled session gets a fresh token for the new request
        if session.cancel.is_cancelled() {
            session.cancel = CancellationToken::new();
        }

        let emitter = self.events.emitter_for(&session_id);
        let mut ctx = WorkflowContext::new(&session_id, message, emitter.clone(), session.cancel.clone());
        ctx.awaiting_password = session.awaiting_password;

        let start = if session.state == WorkflowState::Dev && session.awaiting_password {
            WorkflowState::Dev
        } else {
            WorkflowState::WorkflowStart
        };

        let mut transitions = Vec::new();
        let result = self.machine.run(&mut ctx, start, &mut transitions).await;
        session.record_transitions(transitions);

        match result {
            Ok(_) => {
                session.state = if ctx.awaiting_password {
                    WorkflowState::Dev
                } else {
                    WorkflowState::WorkflowStart
                };
                session.awaiting_password = ctx.awaiting_password;
            }
            Err(ref e) => {
                warn!(session_id = %session_id, error = %e, kind = e.kind(), "orchestrator: run failed");
                emitter.agent_message(user_facing_failure(e));
                emitter.error(e.kind(), e.to_string());
                session.state = WorkflowState::WorkflowStart;
                session.awaiting_password = false;
            }
        }

        if !ctx.todo.is_empty() {
            session.todo = Some(ctx.todo.clone());
        }
        session.last_analysis = ctx.analysis.clone();
        session.touch();
        emitter.done();
        session_id
    }

    /// Cancel a session's in-flight work.
    pub async fn cancel_session(&self, session_id: &str) -> bool {
        self.sessions.cancel(session_id).await
    }

    /// Stop background tasks and tear down MCP children.
    pub async fn shutdown(&self) {
        info!("orchestrator: shutting down");
        self.shutdown.cancel();
        self.mcp.shutdown().await;
    }
}

/// Plain-language explanation for the terminal error frame.
fn user_facing_failure(error: &WorkflowError) -> String {
    match error {
        WorkflowError::Cancelled => "The request was cancelled.".to_string(),
        WorkflowError::HandlerTimeout { state, .. } | WorkflowError::TransitionTimeout { state, .. } => {
            format!("The {state} step took too long and was aborted.")
        }
        WorkflowError::HandlerError { message, .. } => {
            format!("Something went wrong while working on your request: {message}")
        }
        _ => "An internal error stopped this request.".to_string(),
    }
}
