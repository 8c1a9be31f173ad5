//! Sync waiter.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{AppState, GitOpsClient, HealthStatus, SyncStatus};
use crate::baseline::Baseline;
use crate::cancel::CancelToken;
use crate::error::ValidateError;
use crate::poll::{Step, poll_until};

/// Timeout and poll cadence for one sync wait.
#[derive(Debug, Clone, Copy)]
pub struct SyncWaiterConfig {
    /// Budget for the application to sync and become healthy on a new
    /// revision.
    pub timeout: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
}

impl Default for SyncWaiterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Polls a GitOps application until it is synced and healthy on a revision
/// past the captured baseline.
pub struct SyncWaiter<'a> {
    client: &'a dyn GitOpsClient,
    config: SyncWaiterConfig,
    cancel: CancelToken,
}

impl<'a> SyncWaiter<'a> {
    /// Creates a waiter over `client`.
    #[must_use]
    pub const fn new(
        client: &'a dyn GitOpsClient,
        config: SyncWaiterConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Waits until `app` reports `Synced`, `Healthy`, and a revision
    /// different from `baseline`.
    ///
    /// A refresh nudge is issued first so the controller notices the new
    /// commit promptly; its failure is logged and ignored, since the
    /// controller's own reconciliation loop will catch up regardless.
    ///
    /// # Errors
    ///
    /// - `SyncTimeout` with the last observed state when the predicate
    ///   never holds within the budget.
    /// - `Cancelled` when interrupted mid-poll.
    pub fn wait_for_sync(
        &self,
        app: &str,
        baseline: &Baseline,
    ) -> Result<AppState, ValidateError> {
        if let Err(error) = self.client.refresh(app) {
            warn!(app, %error, "refresh nudge failed, relying on controller reconciliation");
        }

        let old_revision = baseline.revision().to_string();
        debug!(app, %old_revision, "waiting for sync past baseline revision");

        let mut last = AppState {
            app: app.to_string(),
            sync_status: SyncStatus::Unknown,
            health_status: HealthStatus::Unknown,
            revision: String::new(),
        };

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.timeout,
            &self.cancel,
            || match self.client.application(app) {
                Ok(state) => {
                    last = state.clone();
                    let synced = state.sync_status == SyncStatus::Synced
                        && state.health_status == HealthStatus::Healthy
                        && state.revision != old_revision;
                    if synced {
                        Ok(Step::Ready(state))
                    } else {
                        Ok(Step::Pending)
                    }
                },
                Err(error) if error.is_transient() => {
                    Ok(Step::Transient(error.to_string()))
                },
                Err(error) => Err(error),
            },
        )?;

        let state = outcome.into_result(
            |waited| ValidateError::SyncTimeout {
                app: app.to_string(),
                sync_status: last.sync_status,
                health_status: last.health_status,
                revision: last.revision.clone(),
                waited,
            },
            || ValidateError::Cancelled {
                stage: format!("sync ({app})"),
            },
        )?;

        info!(app, revision = %state.revision, "application synced and healthy");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::MockGitOpsClient;

    fn fast_config() -> SyncWaiterConfig {
        SyncWaiterConfig {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn state(sync: SyncStatus, health: HealthStatus, revision: &str) -> AppState {
        AppState {
            app: "app-dev".to_string(),
            sync_status: sync,
            health_status: health,
            revision: revision.to_string(),
        }
    }

    #[test]
    fn synced_at_baseline_revision_never_satisfies() {
        // Synced and healthy, but still at the baseline revision: stale
        // state from before the run. Must time out, not pass.
        let client = MockGitOpsClient::scripted(vec![state(
            SyncStatus::Synced,
            HealthStatus::Healthy,
            "r1",
        )]);
        let waiter = SyncWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::sync_revision("app-dev", "r1");

        let error = waiter.wait_for_sync("app-dev", &baseline).unwrap_err();
        match error {
            ValidateError::SyncTimeout {
                sync_status,
                health_status,
                revision,
                ..
            } => {
                assert_eq!(sync_status, SyncStatus::Synced);
                assert_eq!(health_status, HealthStatus::Healthy);
                assert_eq!(revision, "r1");
            },
            other => panic!("expected SyncTimeout, got {other}"),
        }
    }

    #[test]
    fn revision_advance_with_same_statuses_succeeds() {
        let client = MockGitOpsClient::scripted(vec![
            state(SyncStatus::Synced, HealthStatus::Healthy, "r1"),
            state(SyncStatus::OutOfSync, HealthStatus::Progressing, "r1"),
            state(SyncStatus::Synced, HealthStatus::Healthy, "r2"),
        ]);
        let waiter = SyncWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::sync_revision("app-dev", "r1");

        let synced = waiter.wait_for_sync("app-dev", &baseline).unwrap();
        assert_eq!(synced.revision, "r2");
    }

    #[test]
    fn new_revision_but_degraded_does_not_satisfy() {
        let client = MockGitOpsClient::scripted(vec![state(
            SyncStatus::Synced,
            HealthStatus::Degraded,
            "r2",
        )]);
        let waiter = SyncWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::sync_revision("app-dev", "r1");

        assert!(matches!(
            waiter.wait_for_sync("app-dev", &baseline),
            Err(ValidateError::SyncTimeout { .. })
        ));
    }

    #[test]
    fn empty_baseline_accepts_first_synced_revision() {
        // Application had never synced before the run.
        let client = MockGitOpsClient::scripted(vec![state(
            SyncStatus::Synced,
            HealthStatus::Healthy,
            "r1",
        )]);
        let waiter = SyncWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::sync_revision("app-dev", "");

        let synced = waiter.wait_for_sync("app-dev", &baseline).unwrap();
        assert_eq!(synced.revision, "r1");
    }

    #[test]
    fn refresh_failure_is_not_fatal() {
        let client = MockGitOpsClient::scripted(vec![state(
            SyncStatus::Synced,
            HealthStatus::Healthy,
            "r2",
        )])
        .with_failing_refresh();
        let waiter = SyncWaiter::new(&client, fast_config(), CancelToken::new());
        let baseline = Baseline::sync_revision("app-dev", "r1");

        let synced = waiter.wait_for_sync("app-dev", &baseline).unwrap();
        assert_eq!(synced.revision, "r2");
        assert_eq!(client.refresh_count(), 1);
    }
}
