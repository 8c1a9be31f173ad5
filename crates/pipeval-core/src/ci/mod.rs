//! CI build observation.
//!
//! The engine never executes builds; it observes a CI system's build
//! lifecycle through read-only polling and classifies the reported state.
//! The actual trigger (a commit or merge) is performed elsewhere, which is
//! why every wait is anchored to a [`Baseline`] captured before that
//! trigger: without it, a stale build left over from a prior run would
//! satisfy the wait.
//!
//! The API surface is a trait so waiters can be exercised against the
//! scripted [`MockCiClient`] without a network.

mod jenkins;
mod waiter;

use std::collections::VecDeque;
use std::sync::Mutex;

pub use jenkins::JenkinsClient;
use serde::{Deserialize, Serialize};
pub use waiter::{BuildPhase, BuildWaiter, BuildWaiterConfig, CompletedBuild};

use crate::baseline::Baseline;
use crate::error::ValidateError;

/// Number of console lines attached to build-failure diagnostics.
pub const LOG_TAIL_LINES: usize = 50;

/// Result string reported by the CI system for a finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildResult {
    /// Build completed successfully.
    Success,
    /// Build completed with a failure.
    Failure,
    /// Build was aborted before completion.
    Aborted,
    /// Any other terminal result (e.g. UNSTABLE); treated as a failure.
    Other(String),
}

impl BuildResult {
    /// Parses the CI system's result string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "ABORTED" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One observation of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSnapshot {
    /// Build number within its job.
    pub number: u64,
    /// Whether the build is still executing.
    pub building: bool,
    /// Terminal result, present once `building` is false.
    pub result: Option<BuildResult>,
}

/// Read-only client for a CI system.
pub trait CiClient: Send + Sync {
    /// The job's most recent build, or `None` when the job has never run.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or the response cannot be
    /// decoded.
    fn last_build(&self, job: &str) -> Result<Option<BuildSnapshot>, ValidateError>;

    /// A specific build of the job.
    ///
    /// # Errors
    ///
    /// Returns an error when the build does not exist or the request
    /// fails.
    fn build(&self, job: &str, number: u64) -> Result<BuildSnapshot, ValidateError>;

    /// The last `lines` lines of the build's console log.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails.
    fn console_tail(
        &self,
        job: &str,
        number: u64,
        lines: usize,
    ) -> Result<String, ValidateError>;

    /// Whether the job currently has queued work (postflight residue
    /// probe).
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails.
    fn has_queued_builds(&self, job: &str) -> Result<bool, ValidateError>;

    /// Read-only reachability and authentication probe.
    ///
    /// # Errors
    ///
    /// Returns an error when the system is unreachable or rejects the
    /// credentials.
    fn ping(&self) -> Result<(), ValidateError>;
}

/// Captures a build-number baseline for `job`.
///
/// Must be called before the action expected to start a new build. A job
/// that has never run baselines at build number 0; absence is a valid
/// starting state, not an error.
///
/// # Errors
///
/// Returns an error only when the CI system cannot be queried at all.
pub fn capture_build_baseline(
    client: &dyn CiClient,
    job: &str,
) -> Result<Baseline, ValidateError> {
    let number = client.last_build(job)?.map_or(0, |build| build.number);
    Ok(Baseline::build(job, number))
}

/// Scripted CI client for tests.
///
/// Each call to [`CiClient::last_build`] or [`CiClient::build`] consumes
/// the next scripted observation; the final observation repeats once the
/// script is exhausted, modelling a system that has settled into a stable
/// state.
#[derive(Debug, Default)]
pub struct MockCiClient {
    observations: Mutex<VecDeque<Option<BuildSnapshot>>>,
    console: String,
    queued: bool,
}

impl MockCiClient {
    /// A client that replays `observations` in order.
    #[must_use]
    pub fn scripted(observations: Vec<Option<BuildSnapshot>>) -> Self {
        Self {
            observations: Mutex::new(observations.into()),
            console: String::new(),
            queued: false,
        }
    }

    /// Sets the console text returned by [`CiClient::console_tail`].
    #[must_use]
    pub fn with_console(mut self, console: impl Into<String>) -> Self {
        self.console = console.into();
        self
    }

    /// Sets the queued-builds flag.
    #[must_use]
    pub const fn with_queued(mut self, queued: bool) -> Self {
        self.queued = queued;
        self
    }

    fn next_observation(&self) -> Option<BuildSnapshot> {
        let mut observations = self
            .observations
            .lock()
            .expect("mock observation lock poisoned");
        if observations.len() > 1 {
            observations.pop_front().flatten()
        } else {
            observations.front().cloned().flatten()
        }
    }
}

impl CiClient for MockCiClient {
    fn last_build(&self, _job: &str) -> Result<Option<BuildSnapshot>, ValidateError> {
        Ok(self.next_observation())
    }

    fn build(&self, job: &str, number: u64) -> Result<BuildSnapshot, ValidateError> {
        self.next_observation()
            .filter(|build| build.number == number)
            .ok_or_else(|| ValidateError::Http {
                system: "ci".to_string(),
                status: Some(404),
                message: format!("build #{number} of {job} not found"),
            })
    }

    fn console_tail(
        &self,
        _job: &str,
        _number: u64,
        lines: usize,
    ) -> Result<String, ValidateError> {
        Ok(tail_lines(&self.console, lines))
    }

    fn has_queued_builds(&self, _job: &str) -> Result<bool, ValidateError> {
        Ok(self.queued)
    }

    fn ping(&self) -> Result<(), ValidateError> {
        Ok(())
    }
}

/// Last `lines` lines of `text`, preserving order.
#[must_use]
pub(crate) fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(number: u64, building: bool, result: Option<BuildResult>) -> BuildSnapshot {
        BuildSnapshot {
            number,
            building,
            result,
        }
    }

    #[test]
    fn build_result_parses_known_and_other() {
        assert_eq!(BuildResult::parse("SUCCESS"), BuildResult::Success);
        assert_eq!(BuildResult::parse("FAILURE"), BuildResult::Failure);
        assert_eq!(BuildResult::parse("ABORTED"), BuildResult::Aborted);
        assert_eq!(
            BuildResult::parse("UNSTABLE"),
            BuildResult::Other("UNSTABLE".to_string())
        );
    }

    #[test]
    fn baseline_uses_last_build_number() {
        let client =
            MockCiClient::scripted(vec![Some(snap(5, false, Some(BuildResult::Success)))]);
        let baseline = capture_build_baseline(&client, "deploy/app").unwrap();
        assert_eq!(baseline.build_number(), 5);
    }

    #[test]
    fn baseline_is_zero_when_job_never_ran() {
        let client = MockCiClient::scripted(vec![None]);
        let baseline = capture_build_baseline(&client, "deploy/app").unwrap();
        assert_eq!(baseline.build_number(), 0);
    }

    #[test]
    fn mock_repeats_final_observation() {
        let client = MockCiClient::scripted(vec![
            None,
            Some(snap(6, false, Some(BuildResult::Success))),
        ]);
        assert!(client.last_build("j").unwrap().is_none());
        assert_eq!(client.last_build("j").unwrap().unwrap().number, 6);
        // Script exhausted: the last observation repeats.
        assert_eq!(client.last_build("j").unwrap().unwrap().number, 6);
    }

    #[test]
    fn tail_lines_keeps_only_the_end() {
        let text = (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, "line 8\nline 9\nline 10");
    }
}
