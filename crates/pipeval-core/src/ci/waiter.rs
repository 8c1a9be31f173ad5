//! Build lifecycle waiter.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BuildResult, CiClient, LOG_TAIL_LINES};
use crate::baseline::Baseline;
use crate::cancel::CancelToken;
use crate::error::ValidateError;
use crate::poll::{Step, poll_until};

/// Observed lifecycle phase of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    /// No build newer than the baseline exists yet.
    NotStarted,
    /// A new build exists and is still executing.
    Running,
    /// The build finished with SUCCESS.
    Succeeded,
    /// The build finished with FAILURE (or another failing result).
    Failed,
    /// The build was aborted.
    Aborted,
}

/// A build observed through to a terminal phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedBuild {
    /// CI job path.
    pub job: String,
    /// Build number that completed.
    pub number: u64,
    /// Terminal phase (always `Succeeded` on the `Ok` path).
    pub phase: BuildPhase,
    /// Wall time from detection to completion.
    pub duration: Duration,
}

/// Timeouts and poll cadence for one build wait.
#[derive(Debug, Clone, Copy)]
pub struct BuildWaiterConfig {
    /// Budget for a new build to appear past the baseline.
    pub start_timeout: Duration,
    /// Budget for the detected build to finish. Starts fresh once the
    /// build is detected: a build that starts late keeps its full running
    /// budget.
    pub run_timeout: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Console lines attached to failure diagnostics.
    pub log_tail_lines: usize,
}

impl Default for BuildWaiterConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(120),
            run_timeout: Duration::from_secs(1200),
            poll_interval: Duration::from_secs(5),
            log_tail_lines: LOG_TAIL_LINES,
        }
    }
}

/// Drives the build lifecycle state machine for a named job:
/// `AwaitingStart → Running → {Succeeded | Failed | Aborted}`.
///
/// Every poll is a read-only GET; the waiter never mutates the CI system,
/// so observing the same build twice (at-least-once triggering upstream)
/// is harmless.
pub struct BuildWaiter<'a> {
    client: &'a dyn CiClient,
    config: BuildWaiterConfig,
    cancel: CancelToken,
}

impl<'a> BuildWaiter<'a> {
    /// Creates a waiter over `client`.
    #[must_use]
    pub const fn new(
        client: &'a dyn CiClient,
        config: BuildWaiterConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Waits for a build newer than `baseline` to appear and complete.
    ///
    /// # Errors
    ///
    /// - `BuildNeverStarted` when no build exceeds the baseline within the
    ///   start budget.
    /// - `BuildFailed` / `BuildAborted` (with the console tail attached)
    ///   when the build reaches a failing terminal state.
    /// - `Cancelled` when the run is interrupted mid-poll.
    pub fn await_build(
        &self,
        job: &str,
        baseline: &Baseline,
    ) -> Result<CompletedBuild, ValidateError> {
        let number = self.await_start(job, baseline)?;
        info!(job, number, "new build detected");
        self.await_completion(job, number)
    }

    /// `AwaitingStart`: poll the latest build number until it exceeds the
    /// baseline.
    fn await_start(&self, job: &str, baseline: &Baseline) -> Result<u64, ValidateError> {
        let floor = baseline.build_number();
        debug!(job, floor, "waiting for a build past the baseline");

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.start_timeout,
            &self.cancel,
            || match self.client.last_build(job) {
                Ok(Some(build)) if build.number > floor => Ok(Step::Ready(build.number)),
                Ok(_) => Ok(Step::Pending),
                Err(error) if error.is_transient() => {
                    Ok(Step::Transient(error.to_string()))
                },
                Err(error) => Err(error),
            },
        )?;

        outcome.into_result(
            |waited| ValidateError::BuildNeverStarted {
                job: job.to_string(),
                baseline: floor,
                waited,
            },
            || ValidateError::Cancelled {
                stage: format!("build start ({job})"),
            },
        )
    }

    /// `Running`: poll the detected build until it stops executing, then
    /// map the reported result to a terminal phase.
    fn await_completion(
        &self,
        job: &str,
        number: u64,
    ) -> Result<CompletedBuild, ValidateError> {
        let started = Instant::now();

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.run_timeout,
            &self.cancel,
            || match self.client.build(job, number) {
                Ok(build) if !build.building => Ok(Step::Ready(build.result)),
                Ok(_) => Ok(Step::Pending),
                Err(error) if error.is_transient() => {
                    Ok(Step::Transient(error.to_string()))
                },
                Err(error) => Err(error),
            },
        )?;

        let result = outcome.into_result(
            |waited| ValidateError::BuildFailed {
                job: job.to_string(),
                number,
                log_tail: format!("build still running after {waited:?}"),
            },
            || ValidateError::Cancelled {
                stage: format!("build completion ({job} #{number})"),
            },
        )?;

        match result {
            Some(BuildResult::Success) => Ok(CompletedBuild {
                job: job.to_string(),
                number,
                phase: BuildPhase::Succeeded,
                duration: started.elapsed(),
            }),
            Some(BuildResult::Aborted) => Err(ValidateError::BuildAborted {
                job: job.to_string(),
                number,
                log_tail: self.log_tail(job, number),
            }),
            // FAILURE, UNSTABLE, a missing result on a non-building build:
            // all failing terminal states.
            _ => Err(ValidateError::BuildFailed {
                job: job.to_string(),
                number,
                log_tail: self.log_tail(job, number),
            }),
        }
    }

    /// Fetches the diagnostic console tail. Best-effort: a failure to
    /// fetch logs must not mask the build failure itself.
    fn log_tail(&self, job: &str, number: u64) -> String {
        self.client
            .console_tail(job, number, self.config.log_tail_lines)
            .unwrap_or_else(|error| format!("<console unavailable: {error}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{BuildSnapshot, MockCiClient};

    fn fast_config() -> BuildWaiterConfig {
        BuildWaiterConfig {
            start_timeout: Duration::from_millis(50),
            run_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
            ..BuildWaiterConfig::default()
        }
    }

    fn snap(number: u64, building: bool, result: Option<BuildResult>) -> Option<BuildSnapshot> {
        Some(BuildSnapshot {
            number,
            building,
            result,
        })
    }

    #[test]
    fn new_build_past_baseline_succeeds() {
        // Baseline build #5; build #6 appears, runs, and succeeds.
        let client = MockCiClient::scripted(vec![
            snap(5, false, Some(BuildResult::Success)),
            snap(6, true, None),
            snap(6, true, None),
            snap(6, false, Some(BuildResult::Success)),
        ]);
        let waiter = BuildWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::build("deploy/app", 5);

        let completed = waiter.await_build("deploy/app", &baseline).unwrap();
        assert_eq!(completed.number, 6);
        assert_eq!(completed.phase, BuildPhase::Succeeded);
    }

    #[test]
    fn stale_build_equal_to_baseline_never_satisfies() {
        // The system keeps reporting the baseline build; the waiter must
        // time out rather than accept it.
        let client = MockCiClient::scripted(vec![snap(5, false, Some(BuildResult::Success))]);
        let waiter = BuildWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::build("deploy/app", 5);

        let error = waiter.await_build("deploy/app", &baseline).unwrap_err();
        assert!(matches!(
            error,
            ValidateError::BuildNeverStarted { baseline: 5, .. }
        ));
    }

    #[test]
    fn job_that_never_ran_starts_from_zero() {
        let client = MockCiClient::scripted(vec![
            None,
            snap(1, false, Some(BuildResult::Success)),
            snap(1, false, Some(BuildResult::Success)),
        ]);
        let waiter = BuildWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::build("deploy/app", 0);

        let completed = waiter.await_build("deploy/app", &baseline).unwrap();
        assert_eq!(completed.number, 1);
    }

    #[test]
    fn failed_build_attaches_log_tail() {
        let client = MockCiClient::scripted(vec![
            snap(6, true, None),
            snap(6, false, Some(BuildResult::Failure)),
        ])
        .with_console("compiling\nerror: tests failed");
        let waiter = BuildWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::build("deploy/app", 5);

        let error = waiter.await_build("deploy/app", &baseline).unwrap_err();
        match error {
            ValidateError::BuildFailed { number, log_tail, .. } => {
                assert_eq!(number, 6);
                assert!(log_tail.contains("tests failed"));
            },
            other => panic!("expected BuildFailed, got {other}"),
        }
    }

    #[test]
    fn aborted_build_is_distinguished_from_failure() {
        let client = MockCiClient::scripted(vec![
            snap(6, false, Some(BuildResult::Aborted)),
        ]);
        let waiter = BuildWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::build("deploy/app", 5);

        assert!(matches!(
            waiter.await_build("deploy/app", &baseline),
            Err(ValidateError::BuildAborted { number: 6, .. })
        ));
    }

    #[test]
    fn unstable_result_is_a_failure() {
        let client = MockCiClient::scripted(vec![snap(
            6,
            false,
            Some(BuildResult::Other("UNSTABLE".to_string())),
        )]);
        let waiter = BuildWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::build("deploy/app", 5);

        assert!(matches!(
            waiter.await_build("deploy/app", &baseline),
            Err(ValidateError::BuildFailed { .. })
        ));
    }

    #[test]
    fn run_budget_is_independent_of_start_budget() {
        // The start phase consumes most of its own budget, then the build
        // runs for longer than the whole start budget. It must still
        // complete, because the running phase owns a fresh timer.
        let mut script = Vec::new();
        for _ in 0..20 {
            script.push(snap(5, false, Some(BuildResult::Success))); // ~20ms pending
        }
        script.push(snap(6, true, None));
        for _ in 0..100 {
            script.push(snap(6, true, None)); // ~100ms running > start_timeout
        }
        script.push(snap(6, false, Some(BuildResult::Success)));

        let client = MockCiClient::scripted(script);
        let config = BuildWaiterConfig {
            start_timeout: Duration::from_millis(50),
            run_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(1),
            ..BuildWaiterConfig::default()
        };
        let waiter = BuildWaiter::new(&client, config, CancelToken::new());
        let baseline = Baseline::build("deploy/app", 5);

        let completed = waiter.await_build("deploy/app", &baseline).unwrap();
        assert_eq!(completed.phase, BuildPhase::Succeeded);
    }

    #[test]
    fn cancellation_reports_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let client = MockCiClient::scripted(vec![snap(6, true, None)]);
        let waiter = BuildWaiter::new(&client, fast_config(), cancel);
        let baseline = Baseline::build("deploy/app", 5);

        assert!(matches!(
            waiter.await_build("deploy/app", &baseline),
            Err(ValidateError::Cancelled { .. })
        ));
    }
}
