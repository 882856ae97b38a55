//! Event bus - the push API toward the web layer
//!
//! Every user-visible step of a workflow emits a typed frame here. The web
//! layer subscribes and forwards frames onto its SSE stream; the core never
//! blocks on slow consumers (fire-and-forget broadcast).

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::StatusCounts;

/// Default channel capacity (frames).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// A frame pushed to the web layer. The serialized form is
/// `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Frame {
    /// Workflow progress note (state entered, item picked, ...).
    Status {
        session_id: String,
        state: String,
        detail: String,
    },
    /// Plain-language message from one of the personas.
    AgentMessage { session_id: String, message: String },
    ToolStarted {
        session_id: String,
        item_id: String,
        tool: String,
        parameters: Value,
    },
    ToolResult {
        session_id: String,
        item_id: String,
        tool: String,
        success: bool,
        output: String,
        duration_ms: u64,
    },
    Verification {
        session_id: String,
        item_id: String,
        verified: bool,
        explanation: String,
    },
    Summary {
        session_id: String,
        text: String,
        counts: StatusCounts,
    },
    /// Machine-readable error frame; a plain-language `agent_message`
    /// accompanies every terminal failure.
    Error {
        session_id: String,
        kind: String,
        message: String,
    },
    Done { session_id: String },
}

impl Frame {
    pub fn session_id(&self) -> &str {
        match self {
            Frame::Status { session_id, .. }
            | Frame::AgentMessage { session_id, .. }
            | Frame::ToolStarted { session_id, .. }
            | Frame::ToolResult { session_id, .. }
            | Frame::Verification { session_id, .. }
            | Frame::Summary { session_id, .. }
            | Frame::Error { session_id, .. }
            | Frame::Done { session_id } => session_id,
        }
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Frame::Status { .. } => "status",
            Frame::AgentMessage { .. } => "agent_message",
            Frame::ToolStarted { .. } => "tool_started",
            Frame::ToolResult { .. } => "tool_result",
            Frame::Verification { .. } => "verification",
            Frame::Summary { .. } => "summary",
            Frame::Error { .. } => "error",
            Frame::Done { .. } => "done",
        }
    }
}

/// Broadcast bus for workflow frames.
pub struct EventBus {
    tx: broadcast::Sender<Frame>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit a frame. Dropped silently when nobody subscribes.
    pub fn emit(&self, frame: Frame) {
        debug!(frame_type = frame.frame_type(), session_id = frame.session_id(), "event");
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emitter bound to one session id.
    pub fn emitter_for(&self, session_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            session_id: session_id.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create a bus wrapped in an Arc for shared ownership.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

/// Cheap-to-clone handle that stamps the session id on every frame.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Frame>,
    session_id: String,
}

impl EventEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, frame: Frame) {
        debug!(frame_type = frame.frame_type(), session_id = %self.session_id, "event");
        let _ = self.tx.send(frame);
    }

    pub fn status(&self, state: &str, detail: impl Into<String>) {
        self.emit(Frame::Status {
            session_id: self.session_id.clone(),
            state: state.to_string(),
            detail: detail.into(),
        });
    }

    pub fn agent_message(&self, message: impl Into<String>) {
        self.emit(Frame::AgentMessage {
            session_id: self.session_id.clone(),
            message: message.into(),
        });
    }

    pub fn tool_started(&self, item_id: &str, tool: &str, parameters: Value) {
        self.emit(Frame::ToolStarted {
            session_id: self.session_id.clone(),
            item_id: item_id.to_string(),
            tool: tool.to_string(),
            parameters,
        });
    }

    pub fn tool_result(&self, item_id: &str, tool: &str, success: bool, output: &str, duration_ms: u64) {
        self.emit(Frame::ToolResult {
            session_id: self.session_id.clone(),
            item_id: item_id.to_string(),
            tool: tool.to_string(),
            success,
            output: output.to_string(),
            duration_ms,
        });
    }

    pub fn verification(&self, item_id: &str, verified: bool, explanation: &str) {
        self.emit(Frame::Verification {
            session_id: self.session_id.clone(),
            item_id: item_id.to_string(),
            verified,
            explanation: explanation.to_string(),
        });
    }

    pub fn summary(&self, text: impl Into<String>, counts: StatusCounts) {
        self.emit(Frame::Summary {
            session_id: self.session_id.clone(),
            text: text.into(),
            counts,
        });
    }

    pub fn error(&self, kind: &str, message: impl Into<String>) {
        self.emit(Frame::Error {
            session_id: self.session_id.clone(),
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    pub fn done(&self) {
        self.emit(Frame::Done {
            session_id: self.session_id.clone(),
        });
    }
}
