//! Stage reports and the run summary.
//!
//! Every stage the orchestrator attempts leaves a report: passed, failed
//! (with the error rendered into the detail), or skipped because an
//! earlier stage failed. The summary renders as a fixed-width table for
//! humans and serializes to JSON for machines.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ValidateError;

/// Terminal outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    /// The stage completed.
    Passed,
    /// The stage failed; the run halted here.
    Failed,
    /// The stage was not reached, or was soft-skipped by policy.
    Skipped,
}

/// Report for one attempted (or skipped) stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage label, e.g. `build (dev)`.
    pub stage: String,
    /// Outcome.
    pub outcome: StageOutcome,
    /// Stage duration in milliseconds (0 for skipped stages).
    pub duration_ms: u64,
    /// Human-readable detail: result data, error, or skip reason.
    pub detail: String,
}

/// Aggregated result of one validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Whether every attempted stage passed.
    pub passed: bool,
    /// Total wall time in milliseconds.
    pub elapsed_ms: u64,
    /// Reports in execution order, skipped stages last.
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    /// Renders the summary as a fixed-width table.
    #[must_use]
    pub fn render_table(&self) -> String {
        let stage_width = self
            .stages
            .iter()
            .map(|report| report.stage.len())
            .max()
            .unwrap_or(5)
            .max(5);

        let mut out = String::new();
        out.push_str(&format!(
            "{:<stage_width$}  {:<7}  {:>9}  detail\n",
            "stage", "outcome", "time"
        ));
        for report in &self.stages {
            let outcome = match report.outcome {
                StageOutcome::Passed => "passed",
                StageOutcome::Failed => "FAILED",
                StageOutcome::Skipped => "skipped",
            };
            let detail = report.detail.lines().next().unwrap_or("");
            out.push_str(&format!(
                "{:<stage_width$}  {:<7}  {:>7}ms  {detail}\n",
                report.stage, outcome, report.duration_ms
            ));
        }
        out.push_str(&format!(
            "\n{} in {}ms\n",
            if self.passed { "PASSED" } else { "FAILED" },
            self.elapsed_ms
        ));
        out
    }
}

/// Collects stage reports as the orchestrator executes.
#[derive(Debug)]
pub struct StageRecorder {
    started: Instant,
    reports: Vec<StageReport>,
}

impl Default for StageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRecorder {
    /// Starts the run clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            reports: Vec::new(),
        }
    }

    /// Runs `stage` under `label`, recording its outcome and duration.
    ///
    /// The stage's own result is passed through so the caller can keep
    /// sequencing on `?`.
    ///
    /// # Errors
    ///
    /// Returns the stage's error unchanged after recording it.
    pub fn run_stage<T>(
        &mut self,
        label: &str,
        stage: impl FnOnce() -> Result<(T, String), ValidateError>,
    ) -> Result<T, ValidateError> {
        info!(stage = label, "stage started");
        let started = Instant::now();
        match stage() {
            Ok((value, detail)) => {
                self.push(label, StageOutcome::Passed, started.elapsed(), detail);
                Ok(value)
            },
            Err(failure) => {
                error!(stage = label, %failure, "stage failed");
                self.push(
                    label,
                    StageOutcome::Failed,
                    started.elapsed(),
                    failure.to_string(),
                );
                Err(failure)
            },
        }
    }

    /// Records a stage that was not attempted.
    pub fn skip(&mut self, label: &str, reason: &str) {
        self.push(label, StageOutcome::Skipped, Duration::ZERO, reason.to_string());
    }

    /// Records a stage outcome directly. For stages whose outcome policy
    /// is richer than pass/fail, e.g. a soft-skipped promotion hop.
    pub fn record(
        &mut self,
        label: &str,
        outcome: StageOutcome,
        duration: Duration,
        detail: impl Into<String>,
    ) {
        self.push(label, outcome, duration, detail.into());
    }

    /// Labels recorded so far, in order.
    #[must_use]
    pub fn recorded_labels(&self) -> Vec<String> {
        self.reports.iter().map(|report| report.stage.clone()).collect()
    }

    /// Finishes the run and produces the summary.
    #[must_use]
    pub fn finish(self, passed: bool) -> RunSummary {
        RunSummary {
            passed,
            elapsed_ms: duration_ms(self.started.elapsed()),
            stages: self.reports,
        }
    }

    fn push(
        &mut self,
        label: &str,
        outcome: StageOutcome,
        duration: Duration,
        detail: String,
    ) {
        self.reports.push(StageReport {
            stage: label.to_string(),
            outcome,
            duration_ms: duration_ms(duration),
            detail,
        });
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_stage_is_recorded_with_detail() {
        let mut recorder = StageRecorder::new();
        let value = recorder
            .run_stage("build (dev)", || Ok((6, "build #6 succeeded".to_string())))
            .unwrap();
        assert_eq!(value, 6);

        let summary = recorder.finish(true);
        assert_eq!(summary.stages.len(), 1);
        assert_eq!(summary.stages[0].outcome, StageOutcome::Passed);
        assert_eq!(summary.stages[0].detail, "build #6 succeeded");
    }

    #[test]
    fn failing_stage_records_and_propagates() {
        let mut recorder = StageRecorder::new();
        let result: Result<(), _> = recorder.run_stage("sync (dev)", || {
            Err(ValidateError::InvalidInput {
                field: "app".to_string(),
                reason: "empty".to_string(),
            })
        });
        assert!(result.is_err());

        let summary = recorder.finish(false);
        assert_eq!(summary.stages[0].outcome, StageOutcome::Failed);
        assert!(summary.stages[0].detail.contains("invalid input"));
        assert!(!summary.passed);
    }

    #[test]
    fn table_lists_every_stage_and_verdict() {
        let mut recorder = StageRecorder::new();
        let _ = recorder.run_stage("preflight", || Ok(((), "all reachable".to_string())));
        recorder.skip("promotion (stage)", "not reached");
        let summary = recorder.finish(true);

        let table = summary.render_table();
        assert!(table.contains("preflight"));
        assert!(table.contains("promotion (stage)"));
        assert!(table.contains("skipped"));
        assert!(table.contains("PASSED"));
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut recorder = StageRecorder::new();
        let _ = recorder.run_stage("preflight", || Ok(((), String::new())));
        let summary = recorder.finish(true);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["passed"], true);
        assert_eq!(json["stages"][0]["outcome"], "passed");
    }
}
