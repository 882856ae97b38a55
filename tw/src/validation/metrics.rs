//! Per-stage and per-pipeline validation counters

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters for one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl StageMetrics {
    pub fn avg_duration_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.calls as f64
        }
    }
}

/// Aggregated pipeline counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_runs: u64,
    pub passed_runs: u64,
    pub total_duration_ms: u64,
    /// Runs that exceeded the slow-validation threshold.
    pub slow_runs: u64,
    pub stages: HashMap<String, StageMetrics>,
}

impl PipelineMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.passed_runs as f64 / self.total_runs as f64
        }
    }

    pub fn avg_duration_ms(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_runs as f64
        }
    }
}

/// Thread-safe recorder the pipeline writes into.
#[derive(Default)]
pub struct MetricsRecorder {
    inner: Mutex<PipelineMetrics>,
}

impl MetricsRecorder {
    pub fn record_stage(&self, stage: &str, passed: bool, duration: Duration) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let entry = inner.stages.entry(stage.to_string()).or_default();
        entry.calls += 1;
        if passed {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.total_duration_ms += duration.as_millis() as u64;
    }

    pub fn record_run(&self, passed: bool, duration: Duration, slow_threshold: Duration) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.total_runs += 1;
        if passed {
            inner.passed_runs += 1;
        }
        inner.total_duration_ms += duration.as_millis() as u64;
        if duration > slow_threshold {
            inner.slow_runs += 1;
        }
    }

    pub fn snapshot(&self) -> PipelineMetrics {
        self.inner.lock().expect("metrics lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_accumulation() {
        let recorder = MetricsRecorder::default();
        recorder.record_stage("format", true, Duration::from_millis(2));
        recorder.record_stage("format", false, Duration::from_millis(4));

        let snapshot = recorder.snapshot();
        let format = &snapshot.stages["format"];
        assert_eq!(format.calls, 2);
        assert_eq!(format.successes, 1);
        assert_eq!(format.failures, 1);
        assert!((format.avg_duration_ms() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_run_accumulation_and_slow_detection() {
        let recorder = MetricsRecorder::default();
        recorder.record_run(true, Duration::from_millis(10), Duration::from_millis(100));
        recorder.record_run(false, Duration::from_millis(200), Duration::from_millis(100));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.total_runs, 2);
        assert_eq!(snapshot.passed_runs, 1);
        assert_eq!(snapshot.slow_runs, 1);
        assert!((snapshot.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_metrics() {
        let snapshot = MetricsRecorder::default().snapshot();
        assert_eq!(snapshot.success_rate(), 0.0);
        assert_eq!(snapshot.avg_duration_ms(), 0.0);
    }
}
