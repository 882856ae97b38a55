//! Stage 2: history-based guards
//!
//! Consults the shared execution history: a call that keeps failing with
//! the same parameters is flagged for blocking, and a tool with a poor
//! success rate gets a warning attached. The stage is non-critical, so its
//! findings surface as warnings on the pipeline result; the hard pre-flight
//! denial lives with the repetition inspector.

use async_trait::async_trait;

use crate::domain::ToolCall;
use crate::history::SharedHistory;
use crate::validation::result::StageOutcome;
use crate::validation::{ValidationSettings, Validator};

pub struct HistoryValidator {
    history: SharedHistory,
    window: usize,
    max_failures: u32,
    min_success_rate: f64,
}

impl HistoryValidator {
    pub fn new(history: SharedHistory, settings: &ValidationSettings) -> Self {
        Self {
            history,
            window: settings.anti_repetition_window,
            max_failures: settings.max_failures_before_block,
            min_success_rate: settings.min_success_rate,
        }
    }
}

#[async_trait]
impl Validator for HistoryValidator {
    fn name(&self) -> &'static str {
        "history"
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn validate(&self, calls: &[ToolCall]) -> StageOutcome {
        let mut outcome = StageOutcome::default();

        for call in calls {
            let check = self
                .history
                .check_repetition_after_failure(call, self.window, self.max_failures);
            if check.blocked {
                let mut message = format!(
                    "{} failed {} times recently with identical parameters",
                    call.tool, check.count
                );
                if let Some(error) = &check.last_error {
                    message.push_str(&format!(" (last error: {error})"));
                }
                outcome.errors.push(message);
                continue;
            }

            if let Some(rate) = self.history.success_rate(&call.server, &call.tool) {
                if rate < self.min_success_rate {
                    outcome.warnings.push(format!(
                        "{} has a low success rate ({:.0}%)",
                        call.tool,
                        rate * 100.0
                    ));
                }
            }
        }

        outcome
    }
}
