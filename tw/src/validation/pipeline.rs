//! The staged validation pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::ToolCall;
use crate::history::SharedHistory;

use super::metrics::{MetricsRecorder, PipelineMetrics};
use super::result::{StageIssue, ValidationResult};
use super::stages::{FormatValidator, HistoryValidator, McpSyncValidator, SchemaValidator};
use super::{CatalogProvider, ValidationSettings, Validator};

/// Runs validators in priority order with early rejection on critical
/// failures and correction threading between stages.
pub struct ValidationPipeline {
    stages: Vec<Box<dyn Validator>>,
    metrics: MetricsRecorder,
    slow_threshold: Duration,
}

impl ValidationPipeline {
    /// Build the default pipeline: format → history → schema → mcp-sync.
    /// The optional LLM stage is appended by the caller when configured.
    pub fn standard(
        history: SharedHistory,
        catalog: Arc<dyn CatalogProvider>,
        settings: &ValidationSettings,
    ) -> Self {
        Self::from_stages(vec![
            Box::new(FormatValidator),
            Box::new(HistoryValidator::new(history, settings)),
            Box::new(SchemaValidator::new(Arc::clone(&catalog), settings)),
            Box::new(McpSyncValidator::new(catalog, settings)),
        ])
    }

    pub fn from_stages(stages: Vec<Box<dyn Validator>>) -> Self {
        Self {
            stages,
            metrics: MetricsRecorder::default(),
            slow_threshold: Duration::from_secs(1),
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Append a stage (e.g. the optional LLM safety review).
    pub fn push_stage(&mut self, stage: Box<dyn Validator>) {
        self.stages.push(stage);
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }

    /// Validate one planned batch.
    pub async fn validate(&self, calls: &[ToolCall]) -> ValidationResult {
        let run_start = Instant::now();
        let mut current: Vec<ToolCall> = calls.to_vec();
        let mut changed = false;

        let mut result = ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            corrections: Vec::new(),
            corrected_calls: None,
            stages_executed: Vec::new(),
            rejected_at: None,
            total_duration_ms: 0,
        };

        for stage in &self.stages {
            let stage_start = Instant::now();
            let outcome = stage.validate(&current).await;
            let duration = stage_start.elapsed();

            let passed = outcome.passed();
            self.metrics.record_stage(stage.name(), passed, duration);
            result.stages_executed.push(stage.name().to_string());
            debug!(
                stage = stage.name(),
                passed,
                corrections = outcome.corrections.len(),
                duration_ms = duration.as_millis() as u64,
                "pipeline: stage finished"
            );

            result.corrections.extend(outcome.corrections);
            result.warnings.extend(
                outcome
                    .warnings
                    .into_iter()
                    .map(|message| StageIssue {
                        stage: stage.name().to_string(),
                        message,
                    }),
            );
            if let Some(corrected) = outcome.corrected_calls {
                current = corrected;
                changed = true;
            }

            if !passed {
                if stage.is_critical() {
                    result.errors.extend(outcome.errors.into_iter().map(|message| StageIssue {
                        stage: stage.name().to_string(),
                        message,
                    }));
                    result.valid = false;
                    result.rejected_at = Some(stage.name().to_string());
                    warn!(stage = stage.name(), "pipeline: rejected");
                    break;
                }
                // Non-critical failures downgrade to warnings
                result.warnings.extend(outcome.errors.into_iter().map(|message| StageIssue {
                    stage: stage.name().to_string(),
                    message,
                }));
            }
        }

        if changed && result.valid {
            result.corrected_calls = Some(current);
        }
        let total = run_start.elapsed();
        result.total_duration_ms = total.as_millis() as u64;
        self.metrics.record_run(result.valid, total, self.slow_threshold);
        result
    }
}
