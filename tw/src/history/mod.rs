//! Tool execution history - bounded ring, shared process-wide
//!
//! Every tool execution is appended here. The ring is consulted by the
//! validation pipeline's history stage, by the repetition inspectors, and by
//! the planner prompt builder. Writers are rare, readers frequent, so the
//! ring sits behind a `std::sync::RwLock`; nothing awaits while holding it.

mod inspector;

pub use inspector::{InspectionDecision, InspectionManager, Inspector, RepetitionInspector};

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::ToolCall;

/// Default ring capacity; override via `VALIDATION_HISTORY_MAX_SIZE`.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// One recorded tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub server: String,
    /// Canonical tool name.
    pub tool: String,
    pub params_hash: u64,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl HistoryEntry {
    /// Build an entry from a call and its outcome, stamped now.
    pub fn from_call(call: &ToolCall, success: bool, duration_ms: u64, error: Option<String>) -> Self {
        Self {
            server: call.server.clone(),
            tool: call.tool.clone(),
            params_hash: call.params_hash(),
            success,
            duration_ms,
            timestamp: Utc::now(),
            error,
        }
    }

    fn matches_call(&self, call: &ToolCall) -> bool {
        self.server == call.server && self.tool == call.tool && self.params_hash == call.params_hash()
    }
}

/// Result of the repetition-after-failure guard.
#[derive(Debug, Clone, Default)]
pub struct RepetitionCheck {
    pub blocked: bool,
    /// Failures of this exact call inside the window.
    pub count: u32,
    pub last_error: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Bounded FIFO ring of tool executions.
pub struct ToolHistory {
    max_size: usize,
    entries: RwLock<VecDeque<HistoryEntry>>,
}

/// Shared handle used across sessions, validators, and inspectors.
pub type SharedHistory = Arc<ToolHistory>;

impl ToolHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }

    pub fn shared(max_size: usize) -> SharedHistory {
        Arc::new(Self::new(max_size))
    }

    /// Append an execution record, evicting the oldest entry at capacity.
    pub fn record(&self, entry: HistoryEntry) {
        debug!(server = %entry.server, tool = %entry.tool, success = entry.success, "history: record");
        let mut entries = self.entries.write().expect("history lock poisoned");
        if entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_calls(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read().expect("history lock poisoned");
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Success rate for one tool. `None` until the tool has been called.
    pub fn success_rate(&self, server: &str, tool: &str) -> Option<f64> {
        let entries = self.entries.read().expect("history lock poisoned");
        let mut total = 0u32;
        let mut ok = 0u32;
        for entry in entries.iter() {
            if entry.server == server && entry.tool == tool {
                total += 1;
                if entry.success {
                    ok += 1;
                }
            }
        }
        if total == 0 {
            None
        } else {
            Some(f64::from(ok) / f64::from(total))
        }
    }

    /// Count how often this exact call failed inside the last `window`
    /// executions; `blocked` turns on at `max_failures`.
    pub fn check_repetition_after_failure(
        &self,
        call: &ToolCall,
        window: usize,
        max_failures: u32,
    ) -> RepetitionCheck {
        let entries = self.entries.read().expect("history lock poisoned");
        let mut check = RepetitionCheck::default();

        for entry in entries.iter().rev().take(window) {
            if entry.matches_call(call) && !entry.success {
                check.count += 1;
                if check.last_timestamp.is_none() {
                    check.last_timestamp = Some(entry.timestamp);
                    check.last_error = entry.error.clone();
                }
            }
        }

        check.blocked = check.count >= max_failures;
        check
    }

    /// Consecutive run length of this exact call at the head of the history.
    pub fn consecutive_count(&self, call: &ToolCall) -> u32 {
        let entries = self.entries.read().expect("history lock poisoned");
        let mut count = 0;
        for entry in entries.iter().rev() {
            if entry.matches_call(call) {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// Total calls of `(server, tool)` regardless of parameters.
    pub fn total_calls(&self, server: &str, tool: &str) -> u32 {
        let entries = self.entries.read().expect("history lock poisoned");
        entries
            .iter()
            .filter(|e| e.server == server && e.tool == tool)
            .count() as u32
    }

    /// Short human-readable digest for inclusion in planner prompts.
    pub fn format_for_prompt(&self, limit: usize) -> String {
        let recent = self.recent_calls(limit);
        if recent.is_empty() {
            return "No tools have been executed yet.".to_string();
        }

        let mut out = String::from("Recent tool executions (newest first):\n");
        for entry in recent {
            let status = if entry.success { "ok" } else { "FAILED" };
            out.push_str(&format!("- {} [{}] {}ms", entry.tool, status, entry.duration_ms));
            if let Some(error) = &entry.error {
                out.push_str(&format!(" - {error}"));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(server: &str, tool: &str, path: &str) -> ToolCall {
        let mut params = serde_json::Map::new();
        params.insert("path".into(), serde_json::Value::String(path.into()));
        ToolCall::new(server, tool, params)
    }

    fn record_outcome(history: &ToolHistory, call: &ToolCall, success: bool, error: Option<&str>) {
        history.record(HistoryEntry::from_call(call, success, 5, error.map(String::from)));
    }

    #[test]
    fn test_ring_evicts_fifo() {
        let history = ToolHistory::new(3);
        for i in 0..5 {
            let c = call("fs", "read", &format!("/f{i}"));
            record_outcome(&history, &c, true, None);
        }
        assert_eq!(history.len(), 3);

        // Oldest two were evicted; newest is /f4
        let recent = history.recent_calls(10);
        assert_eq!(recent.len(), 3);
        let newest = call("fs", "read", "/f4");
        assert_eq!(recent[0].params_hash, newest.params_hash());
    }

    #[test]
    fn test_success_rate() {
        let history = ToolHistory::with_default_capacity();
        let c = call("fs", "read", "/a");
        assert_eq!(history.success_rate("fs", "fs__read"), None);

        record_outcome(&history, &c, true, None);
        record_outcome(&history, &c, false, Some("denied"));
        record_outcome(&history, &c, false, Some("denied"));
        record_outcome(&history, &c, true, None);

        let rate = history.success_rate("fs", "fs__read").unwrap();
        assert!((rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_repetition_after_failure_blocks_at_threshold() {
        let history = ToolHistory::with_default_capacity();
        let c = call("playwright", "click", "#submit");

        record_outcome(&history, &c, false, Some("no such element"));
        record_outcome(&history, &c, false, Some("no such element"));
        let check = history.check_repetition_after_failure(&c, 100, 3);
        assert!(!check.blocked);
        assert_eq!(check.count, 2);

        record_outcome(&history, &c, false, Some("no such element"));
        let check = history.check_repetition_after_failure(&c, 100, 3);
        assert!(check.blocked);
        assert_eq!(check.count, 3);
        assert_eq!(check.last_error.as_deref(), Some("no such element"));
        assert!(check.last_timestamp.is_some());
    }

    #[test]
    fn test_repetition_window_bounds_lookback() {
        let history = ToolHistory::with_default_capacity();
        let failing = call("fs", "read", "/locked");
        record_outcome(&history, &failing, false, Some("eacces"));
        record_outcome(&history, &failing, false, Some("eacces"));
        record_outcome(&history, &failing, false, Some("eacces"));

        // Push the failures out of a window of 2
        let other = call("fs", "read", "/ok");
        record_outcome(&history, &other, true, None);
        record_outcome(&history, &other, true, None);

        let check = history.check_repetition_after_failure(&failing, 2, 3);
        assert!(!check.blocked);
        assert_eq!(check.count, 0);
    }

    #[test]
    fn test_different_params_are_distinct() {
        let history = ToolHistory::with_default_capacity();
        let a = call("fs", "read", "/a");
        let b = call("fs", "read", "/b");
        record_outcome(&history, &a, false, Some("x"));
        record_outcome(&history, &a, false, Some("x"));
        record_outcome(&history, &a, false, Some("x"));

        let check = history.check_repetition_after_failure(&b, 100, 3);
        assert!(!check.blocked);
    }

    #[test]
    fn test_consecutive_count_resets_on_other_call() {
        let history = ToolHistory::with_default_capacity();
        let a = call("fs", "read", "/a");
        let b = call("fs", "read", "/b");

        record_outcome(&history, &a, false, None);
        record_outcome(&history, &a, false, None);
        assert_eq!(history.consecutive_count(&a), 2);

        record_outcome(&history, &b, true, None);
        assert_eq!(history.consecutive_count(&a), 0);
        assert_eq!(history.consecutive_count(&b), 1);
    }

    #[test]
    fn test_format_for_prompt() {
        let history = ToolHistory::with_default_capacity();
        assert!(history.format_for_prompt(5).contains("No tools"));

        let c = call("fs", "list_directory", "/tmp");
        record_outcome(&history, &c, true, None);
        record_outcome(&history, &c, false, Some("timeout"));

        let text = history.format_for_prompt(5);
        assert!(text.contains("fs__list_directory"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("timeout"));
    }
}
