//! Workflow states and the transition table
//!
//! The table is the sole source of truth: every request threads through
//! this graph and nothing else. Attempting an edge not listed here fails
//! with `InvalidTransition` and changes no state.

use serde::{Deserialize, Serialize};

/// Atomic workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    WorkflowStart,
    ModeSelection,
    Chat,
    Dev,
    Task,
    ContextEnrichment,
    TodoPlanning,
    ItemLoop,
    ServerSelection,
    ToolPlanning,
    Execution,
    Verification,
    Replan,
    FinalSummary,
    WorkflowEnd,
}

impl WorkflowState {
    /// Allowed successor states.
    pub fn allowed_next(&self) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match self {
            WorkflowStart => &[ModeSelection],
            ModeSelection => &[Chat, Task, Dev],
            Chat => &[WorkflowEnd],
            Dev => &[Dev, Task, WorkflowEnd],
            Task => &[ContextEnrichment],
            ContextEnrichment => &[TodoPlanning],
            TodoPlanning => &[ItemLoop],
            ItemLoop => &[ServerSelection, FinalSummary],
            ServerSelection => &[ToolPlanning],
            ToolPlanning => &[Execution],
            Execution => &[Verification],
            Verification => &[ItemLoop, Replan],
            Replan => &[ItemLoop, FinalSummary],
            FinalSummary => &[WorkflowEnd],
            WorkflowEnd => &[],
        }
    }

    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::WorkflowEnd)
    }

    /// States that make up the per-item inner cycle.
    pub fn is_item_cycle(&self) -> bool {
        matches!(
            self,
            WorkflowState::ServerSelection
                | WorkflowState::ToolPlanning
                | WorkflowState::Execution
                | WorkflowState::Verification
                | WorkflowState::Replan
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::WorkflowStart => "workflow_start",
            WorkflowState::ModeSelection => "mode_selection",
            WorkflowState::Chat => "chat",
            WorkflowState::Dev => "dev",
            WorkflowState::Task => "task",
            WorkflowState::ContextEnrichment => "context_enrichment",
            WorkflowState::TodoPlanning => "todo_planning",
            WorkflowState::ItemLoop => "item_loop",
            WorkflowState::ServerSelection => "server_selection",
            WorkflowState::ToolPlanning => "tool_planning",
            WorkflowState::Execution => "execution",
            WorkflowState::Verification => "verification",
            WorkflowState::Replan => "replan",
            WorkflowState::FinalSummary => "final_summary",
            WorkflowState::WorkflowEnd => "workflow_end",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation mode chosen by MODE_SELECTION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Task,
    Dev,
}

impl Mode {
    pub fn parse(text: &str) -> Option<Mode> {
        match text.trim().to_lowercase().as_str() {
            "chat" => Some(Mode::Chat),
            "task" => Some(Mode::Task),
            "dev" => Some(Mode::Dev),
            _ => None,
        }
    }

    pub fn entry_state(&self) -> WorkflowState {
        match self {
            Mode::Chat => WorkflowState::Chat,
            Mode::Task => WorkflowState::Task,
            Mode::Dev => WorkflowState::Dev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowState::*;

    #[test]
    fn test_table_matches_design() {
        assert_eq!(WorkflowStart.allowed_next(), &[ModeSelection]);
        assert_eq!(ModeSelection.allowed_next(), &[Chat, Task, Dev]);
        assert_eq!(Chat.allowed_next(), &[WorkflowEnd]);
        assert_eq!(Dev.allowed_next(), &[Dev, Task, WorkflowEnd]);
        assert_eq!(Task.allowed_next(), &[ContextEnrichment]);
        assert_eq!(ContextEnrichment.allowed_next(), &[TodoPlanning]);
        assert_eq!(TodoPlanning.allowed_next(), &[ItemLoop]);
        assert_eq!(ItemLoop.allowed_next(), &[ServerSelection, FinalSummary]);
        assert_eq!(ServerSelection.allowed_next(), &[ToolPlanning]);
        assert_eq!(ToolPlanning.allowed_next(), &[Execution]);
        assert_eq!(Execution.allowed_next(), &[Verification]);
        assert_eq!(Verification.allowed_next(), &[ItemLoop, Replan]);
        assert_eq!(Replan.allowed_next(), &[ItemLoop, FinalSummary]);
        assert_eq!(FinalSummary.allowed_next(), &[WorkflowEnd]);
        assert!(WorkflowEnd.allowed_next().is_empty());
    }

    #[test]
    fn test_terminal() {
        assert!(WorkflowEnd.is_terminal());
        assert!(!FinalSummary.is_terminal());
    }

    #[test]
    fn test_illegal_jump_rejected() {
        assert!(!ModeSelection.can_transition_to(Execution));
        assert!(!ItemLoop.can_transition_to(Execution));
    }

    #[test]
    fn test_dev_self_loop_allowed() {
        assert!(Dev.can_transition_to(Dev));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse(" TASK "), Some(Mode::Task));
        assert_eq!(Mode::parse("chat"), Some(Mode::Chat));
        assert_eq!(Mode::parse("developer"), None);
    }

    #[test]
    fn test_every_state_reaches_end() {
        // Walk the graph from each state; all paths must be able to reach
        // WORKFLOW_END
        fn reaches_end(state: WorkflowState, seen: &mut Vec<WorkflowState>) -> bool {
            if state == WorkflowEnd {
                return true;
            }
            if seen.contains(&state) {
                return false;
            }
            seen.push(state);
            state.allowed_next().iter().any(|next| reaches_end(*next, seen))
        }

        for state in [
            WorkflowStart,
            ModeSelection,
            Chat,
            Dev,
            Task,
            ContextEnrichment,
            TodoPlanning,
            ItemLoop,
            ServerSelection,
            ToolPlanning,
            Execution,
            Verification,
            Replan,
            FinalSummary,
        ] {
            assert!(reaches_end(state, &mut Vec::new()), "{state} cannot reach the end");
        }
    }
}
