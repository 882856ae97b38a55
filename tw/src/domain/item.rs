//! Todo items - the atomic retry/replan scope
//!
//! An item is one unit of work inside a session's todo. Its status moves
//! forward only; the single allowed regression is the retry reset from
//! `InProgress` back to `Pending`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tool_call::ToolCall;

/// Default number of execution attempts per item.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Blocked-dependency checks tolerated before an item is force-skipped.
pub const DEFAULT_BLOCKED_CHECK_LIMIT: u32 = 10;

/// Lifecycle status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    /// Replaced by follow-up items; terminal for this id.
    Replanned,
}

impl ItemStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped | ItemStatus::Replanned
        )
    }

    /// Whether `self -> next` is an allowed status move.
    pub fn can_transition(&self, next: ItemStatus) -> bool {
        match self {
            ItemStatus::Pending => next != ItemStatus::Pending,
            // The retry reset is the only backward move
            ItemStatus::InProgress => next != ItemStatus::InProgress,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Replanned => "replanned",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing one planned tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Canonical tool name.
    pub tool: String,
    pub success: bool,
    /// Text content returned by the tool (or the error text).
    pub output: String,
    pub duration_ms: u64,
}

/// Record of one execution pass over an item's planned tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub tool_calls: Vec<ToolCall>,
    pub outcomes: Vec<ToolOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// True when every planned call succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.success)
    }
}

/// Verifier verdict over an execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub verified: bool,
    /// Plain-language explanation from the verifier.
    pub explanation: String,
}

/// One unit in a Todo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Opaque item id (UUIDv7, sortable by creation time).
    pub id: String,
    /// What this item should accomplish, in the planner's words.
    pub action: String,
    /// Ids of items that must be `completed` before this one is eligible.
    pub dependencies: BTreeSet<String>,
    pub status: ItemStatus,
    pub max_attempts: u32,
    pub attempt_count: u32,
    /// Times this item was seen with unsatisfied dependencies.
    pub blocked_check_count: u32,
    /// MCP servers chosen for this item by SERVER_SELECTION.
    pub selected_servers: Vec<String>,
    /// Prompt ids chosen for this item.
    pub selected_prompts: Vec<String>,
    pub last_plan: Option<Vec<ToolCall>>,
    pub last_execution: Option<ExecutionRecord>,
    pub last_verification: Option<VerificationRecord>,
    /// Short spoken-progress phrases surfaced to the TTS peer.
    pub tts_phrases: Vec<String>,
    /// Parent item id when this item was produced by REPLAN.
    pub replanned_from: Option<String>,
    /// Reason recorded when the item was skipped or failed.
    pub status_reason: Option<String>,
}

impl Item {
    /// Create a pending item with a fresh id.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            action: action.into(),
            dependencies: BTreeSet::new(),
            status: ItemStatus::Pending,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_count: 0,
            blocked_check_count: 0,
            selected_servers: Vec::new(),
            selected_prompts: Vec::new(),
            last_plan: None,
            last_execution: None,
            last_verification: None,
            tts_phrases: Vec::new(),
            replanned_from: None,
            status_reason: None,
        }
    }

    /// Builder-style dependency attachment, used by the planning handler.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Move the status forward. Returns false (and leaves the item untouched)
    /// when the move is not allowed.
    pub fn set_status(&mut self, next: ItemStatus) -> bool {
        if self.status.can_transition(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Mark skipped with a reason. No-op on terminal items.
    pub fn skip(&mut self, reason: impl Into<String>) -> bool {
        if self.set_status(ItemStatus::Skipped) {
            self.status_reason = Some(reason.into());
            true
        } else {
            false
        }
    }

    /// Mark failed with a reason. No-op on terminal items.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.set_status(ItemStatus::Failed) {
            self.status_reason = Some(reason.into());
            true
        } else {
            false
        }
    }

    /// Whether another execution attempt is allowed.
    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_pending() {
        let item = Item::new("list /tmp");
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempt_count, 0);
        assert!(item.attempts_remaining());
    }

    #[test]
    fn test_status_moves_forward() {
        let mut item = Item::new("x");
        assert!(item.set_status(ItemStatus::InProgress));
        assert!(item.set_status(ItemStatus::Completed));
        // Terminal: nothing else is accepted
        assert!(!item.set_status(ItemStatus::Pending));
        assert!(!item.set_status(ItemStatus::Failed));
        assert_eq!(item.status, ItemStatus::Completed);
    }

    #[test]
    fn test_retry_reset_is_allowed() {
        let mut item = Item::new("x");
        item.set_status(ItemStatus::InProgress);
        assert!(item.set_status(ItemStatus::Pending));
        assert_eq!(item.status, ItemStatus::Pending);
    }

    #[test]
    fn test_replanned_is_terminal() {
        let mut item = Item::new("x");
        item.set_status(ItemStatus::InProgress);
        assert!(item.set_status(ItemStatus::Replanned));
        assert!(item.status.is_terminal());
        assert!(!item.set_status(ItemStatus::Completed));
    }

    #[test]
    fn test_skip_records_reason() {
        let mut item = Item::new("x");
        assert!(item.skip("blocked too many times"));
        assert_eq!(item.status, ItemStatus::Skipped);
        assert_eq!(item.status_reason.as_deref(), Some("blocked too many times"));
        // Second skip is rejected
        assert!(!item.skip("again"));
    }

    #[test]
    fn test_attempts_remaining() {
        let mut item = Item::new("x");
        item.max_attempts = 2;
        item.attempt_count = 1;
        assert!(item.attempts_remaining());
        item.attempt_count = 2;
        assert!(!item.attempts_remaining());
    }
}
