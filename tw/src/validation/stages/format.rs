//! Stage 1: structural checks on the planned calls

use async_trait::async_trait;

use crate::domain::{self, ToolCall};
use crate::validation::result::{Correction, CorrectionKind, StageOutcome};
use crate::validation::Validator;

/// Validates shape: non-empty server and tool names, legal characters, and
/// canonical tool-name form. A missing canonical prefix is auto-corrected.
pub struct FormatValidator;

fn valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl Validator for FormatValidator {
    fn name(&self) -> &'static str {
        "format"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn validate(&self, calls: &[ToolCall]) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        if calls.is_empty() {
            outcome.errors.push("plan contains no tool calls".to_string());
            return outcome;
        }

        let mut corrected: Vec<ToolCall> = calls.to_vec();
        let mut changed = false;

        for (index, call) in calls.iter().enumerate() {
            if !valid_server_name(&call.server) {
                outcome
                    .errors
                    .push(format!("call #{index}: invalid server name {:?}", call.server));
                continue;
            }

            if call.tool.is_empty() || domain::short_name(&call.tool, &call.server).is_empty() {
                outcome.errors.push(format!("call #{index}: empty tool name"));
                continue;
            }

            let canonical = domain::normalize(&call.tool, &call.server);
            if canonical != call.tool {
                outcome.corrections.push(Correction {
                    kind: CorrectionKind::ToolPrefixAdded,
                    tool: canonical.clone(),
                    detail: format!("{} -> {canonical}", call.tool),
                });
                corrected[index].tool = canonical;
                changed = true;
            }
        }

        if changed && outcome.errors.is_empty() {
            outcome.corrected_calls = Some(corrected);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(server: &str, tool: &str) -> ToolCall {
        // Bypass the normalizing constructor deliberately
        ToolCall {
            server: server.to_string(),
            tool: tool.to_string(),
            parameters: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_canonical_call_passes_untouched() {
        let outcome = FormatValidator.validate(&[call("filesystem", "filesystem__read_file")]).await;
        assert!(outcome.passed());
        assert!(outcome.corrections.is_empty());
        assert!(outcome.corrected_calls.is_none());
    }

    #[tokio::test]
    async fn test_bare_tool_name_gets_prefix() {
        let outcome = FormatValidator.validate(&[call("filesystem", "read_file")]).await;
        assert!(outcome.passed());
        assert_eq!(outcome.corrections.len(), 1);
        assert_eq!(outcome.corrections[0].kind, CorrectionKind::ToolPrefixAdded);
        let corrected = outcome.corrected_calls.unwrap();
        assert_eq!(corrected[0].tool, "filesystem__read_file");
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let outcome = FormatValidator.validate(&[]).await;
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn test_bad_server_name_rejected() {
        let outcome = FormatValidator.validate(&[call("file system!", "x")]).await;
        assert!(!outcome.passed());
        assert!(outcome.errors[0].contains("invalid server name"));
    }

    #[tokio::test]
    async fn test_empty_tool_rejected() {
        let outcome = FormatValidator.validate(&[call("filesystem", "")]).await;
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let first = FormatValidator.validate(&[call("filesystem", "read_file")]).await;
        let corrected = first.corrected_calls.unwrap();
        let second = FormatValidator.validate(&corrected).await;
        assert!(second.passed());
        assert!(second.corrections.is_empty());
        assert!(second.corrected_calls.is_none());
    }
}
