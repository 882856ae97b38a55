//! Validation pipeline result types

use serde::{Deserialize, Serialize};

use crate::domain::ToolCall;

/// What an auto-correction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    ParameterRenamed,
    TypeCoerced,
    ToolNameCorrected,
    ToolPrefixAdded,
}

/// One applied correction, for auditing and prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub kind: CorrectionKind,
    /// Canonical tool name the correction applies to (post-correction).
    pub tool: String,
    pub detail: String,
}

/// An error or warning attributed to a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageIssue {
    pub stage: String,
    pub message: String,
}

/// Output of one validator stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub corrections: Vec<Correction>,
    /// Replacement calls threaded into subsequent stages when set.
    pub corrected_calls: Option<Vec<ToolCall>>,
}

impl StageOutcome {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn pass() -> Self {
        Self::default()
    }
}

/// Final verdict of the pipeline over one planned batch of tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<StageIssue>,
    pub warnings: Vec<StageIssue>,
    pub corrections: Vec<Correction>,
    /// The calls to execute: corrected when any stage rewrote them.
    pub corrected_calls: Option<Vec<ToolCall>>,
    pub stages_executed: Vec<String>,
    /// Stage name that rejected the batch, when `valid` is false.
    pub rejected_at: Option<String>,
    pub total_duration_ms: u64,
}

impl ValidationResult {
    /// The calls that should reach execution.
    pub fn effective_calls<'a>(&'a self, original: &'a [ToolCall]) -> &'a [ToolCall] {
        self.corrected_calls.as_deref().unwrap_or(original)
    }
}
