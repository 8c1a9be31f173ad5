//! GitOps sync observation.
//!
//! The GitOps controller reconciles environments to Git on its own
//! schedule, so its reported revision can lag the commit that was just
//! merged. "Synced and healthy" alone is therefore not evidence that the
//! change arrived: the controller may have been synced to an older
//! revision since before this run began. Success additionally requires the
//! sync revision to have moved past the captured baseline.

mod argo;
mod waiter;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use argo::ArgoClient;
use serde::{Deserialize, Serialize};
pub use waiter::{SyncWaiter, SyncWaiterConfig};

use crate::baseline::Baseline;
use crate::error::ValidateError;

/// Sync status reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Status missing or unrecognized.
    Unknown,
    /// Live state diverges from the desired state.
    OutOfSync,
    /// Live state matches the desired state.
    Synced,
}

impl SyncStatus {
    /// Parses the controller's status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Synced" => Self::Synced,
            "OutOfSync" => Self::OutOfSync,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::OutOfSync => f.write_str("OutOfSync"),
            Self::Synced => f.write_str("Synced"),
        }
    }
}

/// Health status reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Status missing or unrecognized.
    Unknown,
    /// Resources are still rolling out.
    Progressing,
    /// All resources are healthy.
    Healthy,
    /// One or more resources are degraded.
    Degraded,
}

impl HealthStatus {
    /// Parses the controller's status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Healthy" => Self::Healthy,
            "Progressing" => Self::Progressing,
            "Degraded" => Self::Degraded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Progressing => f.write_str("Progressing"),
            Self::Healthy => f.write_str("Healthy"),
            Self::Degraded => f.write_str("Degraded"),
        }
    }
}

/// One observation of a GitOps application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    /// Application name.
    pub app: String,
    /// Sync status.
    pub sync_status: SyncStatus,
    /// Health status.
    pub health_status: HealthStatus,
    /// Revision the controller last synced to.
    pub revision: String,
}

/// Read-only client for the GitOps controller, plus a best-effort refresh
/// nudge.
pub trait GitOpsClient: Send + Sync {
    /// Current state of the named application.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or the response cannot be
    /// decoded.
    fn application(&self, name: &str) -> Result<AppState, ValidateError>;

    /// Asks the controller to refresh the application against Git now.
    /// Callers treat failure as non-fatal; the reconciliation loop will
    /// get there on its own schedule.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails; callers log and continue.
    fn refresh(&self, name: &str) -> Result<(), ValidateError>;

    /// Read-only reachability and authentication probe.
    ///
    /// # Errors
    ///
    /// Returns an error when the controller is unreachable or rejects the
    /// credentials.
    fn ping(&self) -> Result<(), ValidateError>;
}

/// Captures a sync-revision baseline for `app`.
///
/// Must be called before the merge expected to advance the revision.
/// An application that has never synced baselines at the empty revision;
/// absence is a valid starting state, not an error.
///
/// # Errors
///
/// Returns an error only when the controller cannot be queried at all.
pub fn capture_sync_baseline(
    client: &dyn GitOpsClient,
    app: &str,
) -> Result<Baseline, ValidateError> {
    match client.application(app) {
        Ok(state) => Ok(Baseline::sync_revision(app, state.revision)),
        Err(error) if matches!(&error, ValidateError::Http { status: Some(404), .. }) => {
            Ok(Baseline::sync_revision(app, ""))
        },
        Err(error) => Err(error),
    }
}

/// Scripted GitOps client for tests.
///
/// Each [`GitOpsClient::application`] call consumes the next scripted
/// state; the final state repeats once the script is exhausted.
#[derive(Debug, Default)]
pub struct MockGitOpsClient {
    states: Mutex<VecDeque<AppState>>,
    refreshes: AtomicUsize,
    refresh_fails: bool,
}

impl MockGitOpsClient {
    /// A client that replays `states` in order.
    #[must_use]
    pub fn scripted(states: Vec<AppState>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            refreshes: AtomicUsize::new(0),
            refresh_fails: false,
        }
    }

    /// Makes [`GitOpsClient::refresh`] fail, for exercising the
    /// best-effort path.
    #[must_use]
    pub const fn with_failing_refresh(mut self) -> Self {
        self.refresh_fails = true;
        self
    }

    /// How many refresh nudges were issued.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl GitOpsClient for MockGitOpsClient {
    fn application(&self, name: &str) -> Result<AppState, ValidateError> {
        let mut states = self.states.lock().expect("mock state lock poisoned");
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        state.ok_or_else(|| ValidateError::Http {
            system: "gitops".to_string(),
            status: Some(404),
            message: format!("application {name} not found"),
        })
    }

    fn refresh(&self, name: &str) -> Result<(), ValidateError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails {
            return Err(ValidateError::Http {
                system: "gitops".to_string(),
                status: Some(500),
                message: format!("refresh of {name} unavailable"),
            });
        }
        Ok(())
    }

    fn ping(&self) -> Result<(), ValidateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(sync: SyncStatus, health: HealthStatus, revision: &str) -> AppState {
        AppState {
            app: "app-dev".to_string(),
            sync_status: sync,
            health_status: health,
            revision: revision.to_string(),
        }
    }

    #[test]
    fn statuses_parse_and_display() {
        assert_eq!(SyncStatus::parse("Synced"), SyncStatus::Synced);
        assert_eq!(SyncStatus::parse("OutOfSync"), SyncStatus::OutOfSync);
        assert_eq!(SyncStatus::parse("garbage"), SyncStatus::Unknown);
        assert_eq!(HealthStatus::parse("Healthy"), HealthStatus::Healthy);
        assert_eq!(HealthStatus::parse("Progressing"), HealthStatus::Progressing);
        assert_eq!(HealthStatus::parse("Degraded"), HealthStatus::Degraded);
        assert_eq!(SyncStatus::Synced.to_string(), "Synced");
        assert_eq!(HealthStatus::Degraded.to_string(), "Degraded");
    }

    #[test]
    fn baseline_captures_current_revision() {
        let client = MockGitOpsClient::scripted(vec![state(
            SyncStatus::Synced,
            HealthStatus::Healthy,
            "r1",
        )]);
        let baseline = capture_sync_baseline(&client, "app-dev").unwrap();
        assert_eq!(baseline.revision(), "r1");
    }

    #[test]
    fn missing_application_baselines_empty() {
        let client = MockGitOpsClient::scripted(vec![]);
        let baseline = capture_sync_baseline(&client, "app-new").unwrap();
        assert_eq!(baseline.revision(), "");
    }
}
