//! Pre-execution inspectors over the shared history
//!
//! Inspectors look at a planned call before it reaches an MCP server and
//! vote. Deny dominates RequireApproval dominates Allow.

use tracing::debug;

use crate::domain::ToolCall;

use super::SharedHistory;

/// Default consecutive identical calls tolerated before a loop is declared.
pub const DEFAULT_CONSECUTIVE_LIMIT: u32 = 3;

/// Default total calls of one tool before approval is required.
pub const DEFAULT_TOTAL_LIMIT: u32 = 10;

/// Verdict of a single inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionDecision {
    Allow,
    RequireApproval { reason: String },
    Deny { reason: String },
}

impl InspectionDecision {
    /// Deny(2) > RequireApproval(1) > Allow(0).
    fn severity(&self) -> u8 {
        match self {
            InspectionDecision::Allow => 0,
            InspectionDecision::RequireApproval { .. } => 1,
            InspectionDecision::Deny { .. } => 2,
        }
    }
}

/// A pre-execution check over the planned call.
pub trait Inspector: Send + Sync {
    fn name(&self) -> &'static str;
    fn inspect(&self, call: &ToolCall) -> InspectionDecision;
}

/// Detects the two repetition patterns from the shared history:
/// a consecutive run of one exact call (loop), and a tool called more times
/// than any sane plan needs.
pub struct RepetitionInspector {
    history: SharedHistory,
    consecutive_limit: u32,
    total_limit: u32,
}

impl RepetitionInspector {
    pub fn new(history: SharedHistory) -> Self {
        Self {
            history,
            consecutive_limit: DEFAULT_CONSECUTIVE_LIMIT,
            total_limit: DEFAULT_TOTAL_LIMIT,
        }
    }

    pub fn with_limits(history: SharedHistory, consecutive_limit: u32, total_limit: u32) -> Self {
        Self {
            history,
            consecutive_limit: consecutive_limit.max(1),
            total_limit: total_limit.max(1),
        }
    }
}

impl Inspector for RepetitionInspector {
    fn name(&self) -> &'static str {
        "repetition"
    }

    fn inspect(&self, call: &ToolCall) -> InspectionDecision {
        let consecutive = self.history.consecutive_count(call);
        if consecutive >= self.consecutive_limit {
            debug!(tool = %call.tool, consecutive, "inspector: loop detected");
            return InspectionDecision::Deny {
                reason: format!(
                    "loop detected: {} executed {consecutive} times in a row with identical parameters",
                    call.tool
                ),
            };
        }

        let total = self.history.total_calls(&call.server, &call.tool);
        if total >= self.total_limit {
            debug!(tool = %call.tool, total, "inspector: total call limit reached");
            return InspectionDecision::RequireApproval {
                reason: format!("{} already called {total} times this run", call.tool),
            };
        }

        InspectionDecision::Allow
    }
}

/// Runs inspectors in registration order and keeps the most severe verdict.
#[derive(Default)]
pub struct InspectionManager {
    inspectors: Vec<Box<dyn Inspector>>,
}

impl InspectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, inspector: Box<dyn Inspector>) {
        self.inspectors.push(inspector);
    }

    /// Inspect one call. An empty manager always allows.
    pub fn inspect(&self, call: &ToolCall) -> InspectionDecision {
        let mut verdict = InspectionDecision::Allow;
        for inspector in &self.inspectors {
            let decision = inspector.inspect(call);
            debug!(inspector = inspector.name(), ?decision, tool = %call.tool, "inspection");
            if decision.severity() > verdict.severity() {
                verdict = decision;
            }
            if matches!(verdict, InspectionDecision::Deny { .. }) {
                break;
            }
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryEntry, ToolHistory};

    fn call(tool: &str, selector: &str) -> ToolCall {
        let mut params = serde_json::Map::new();
        params.insert("selector".into(), serde_json::Value::String(selector.into()));
        ToolCall::new("playwright", tool, params)
    }

    fn record(history: &ToolHistory, c: &ToolCall, success: bool) {
        history.record(HistoryEntry::from_call(c, success, 10, (!success).then(|| "err".into())));
    }

    #[test]
    fn test_allows_fresh_call() {
        let history = ToolHistory::shared(100);
        let inspector = RepetitionInspector::new(history);
        assert_eq!(inspector.inspect(&call("click", "#submit")), InspectionDecision::Allow);
    }

    #[test]
    fn test_denies_consecutive_loop() {
        let history = ToolHistory::shared(100);
        let c = call("click", "#submit");
        for _ in 0..3 {
            record(&history, &c, false);
        }

        let inspector = RepetitionInspector::new(history);
        match inspector.inspect(&c) {
            InspectionDecision::Deny { reason } => assert!(reason.contains("loop detected")),
            other => panic!("expected Deny, got {other:?}"),
        }
    }

    #[test]
    fn test_loop_broken_by_different_params() {
        let history = ToolHistory::shared(100);
        let a = call("click", "#submit");
        let b = call("click", "#cancel");
        record(&history, &a, false);
        record(&history, &a, false);
        record(&history, &b, false);

        let inspector = RepetitionInspector::new(history);
        assert_eq!(inspector.inspect(&a), InspectionDecision::Allow);
    }

    #[test]
    fn test_total_limit_requires_approval() {
        let history = ToolHistory::shared(100);
        // Alternate params so the consecutive guard stays quiet
        for i in 0..10 {
            let c = call("click", &format!("#b{i}"));
            record(&history, &c, true);
        }

        let inspector = RepetitionInspector::new(history);
        match inspector.inspect(&call("click", "#fresh")) {
            InspectionDecision::RequireApproval { reason } => assert!(reason.contains("10 times")),
            other => panic!("expected RequireApproval, got {other:?}"),
        }
    }

    #[test]
    fn test_manager_takes_most_severe() {
        struct Fixed(InspectionDecision);
        impl Inspector for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
            fn inspect(&self, _call: &ToolCall) -> InspectionDecision {
                self.0.clone()
            }
        }

        let mut manager = InspectionManager::new();
        manager.register(Box::new(Fixed(InspectionDecision::Allow)));
        manager.register(Box::new(Fixed(InspectionDecision::RequireApproval {
            reason: "careful".into(),
        })));
        manager.register(Box::new(Fixed(InspectionDecision::Allow)));

        let verdict = manager.inspect(&call("click", "#x"));
        assert!(matches!(verdict, InspectionDecision::RequireApproval { .. }));

        manager.register(Box::new(Fixed(InspectionDecision::Deny { reason: "no".into() })));
        let verdict = manager.inspect(&call("click", "#x"));
        assert!(matches!(verdict, InspectionDecision::Deny { .. }));
    }

    #[test]
    fn test_empty_manager_allows() {
        let manager = InspectionManager::new();
        assert_eq!(manager.inspect(&call("click", "#x")), InspectionDecision::Allow);
    }
}
