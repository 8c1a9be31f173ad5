//! Merge-request resolution and merging.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{ForgeClient, MergeRequest, MergeStatus, select_candidate};
use crate::cancel::CancelToken;
use crate::error::ValidateError;
use crate::poll::{Step, poll_until};

/// Timeouts and poll cadence for MR resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Budget for a matching MR to appear in the open-MR list.
    pub find_timeout: Duration,
    /// Grace window for the host to finish computing mergeability before
    /// `NotMergeableYet` escalates to fatal.
    pub merge_grace: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            find_timeout: Duration::from_secs(180),
            merge_grace: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Finds and merges merge requests matching a fingerprint-derived prefix.
pub struct MergeRequestResolver<'a> {
    client: &'a dyn ForgeClient,
    config: ResolverConfig,
    cancel: CancelToken,
}

impl<'a> MergeRequestResolver<'a> {
    /// Creates a resolver over `client`.
    #[must_use]
    pub const fn new(
        client: &'a dyn ForgeClient,
        config: ResolverConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Polls the open-MR list until one matches `prefix` (created at or
    /// after `since`, when given).
    ///
    /// Candidate selection is [`select_candidate`]: oldest `created_at`
    /// first, `iid` as tie-break, applied identically at every call site.
    ///
    /// # Errors
    ///
    /// - `MergeRequestNotFound` with the last observed candidate branches
    ///   when nothing matches within the budget.
    /// - `Cancelled` when interrupted mid-poll.
    pub fn find(
        &self,
        project: &str,
        target_branch: &str,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<MergeRequest, ValidateError> {
        debug!(project, target_branch, prefix, "looking for merge request");
        let mut last_seen: Vec<String> = Vec::new();

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.find_timeout,
            &self.cancel,
            || match self.client.open_merge_requests(project, target_branch) {
                Ok(open) => {
                    last_seen = open.iter().map(|mr| mr.source_branch.clone()).collect();
                    match select_candidate(&open, prefix, since) {
                        Some(found) => Ok(Step::Ready(found.clone())),
                        None => Ok(Step::Pending),
                    }
                },
                Err(error) if error.is_transient() => {
                    Ok(Step::Transient(error.to_string()))
                },
                Err(error) => Err(error),
            },
        )?;

        outcome.into_result(
            |_waited| ValidateError::MergeRequestNotFound {
                project: project.to_string(),
                target_branch: target_branch.to_string(),
                prefix: prefix.to_string(),
                candidates: last_seen,
            },
            || ValidateError::Cancelled {
                stage: format!("merge request lookup ({prefix})"),
            },
        )
    }

    /// Merges `mr`, waiting out the host's mergeability computation.
    ///
    /// A reported conflict is fatal immediately: conflicts require human
    /// resolution, so retrying cannot help. `Checking`/`Unchecked` states
    /// are polled through within the grace window; when the window closes
    /// the last status escalates as `NotMergeableYet`.
    ///
    /// # Errors
    ///
    /// `HasConflicts`, `NotMergeableYet`, `Cancelled`, or the transport
    /// error from the merge call itself.
    pub fn merge(&self, mr: &MergeRequest) -> Result<MergeRequest, ValidateError> {
        if mr.has_conflicts {
            return Err(ValidateError::HasConflicts {
                project: mr.project.clone(),
                iid: mr.iid,
                source_branch: mr.source_branch.clone(),
            });
        }

        let mut last_status = mr.merge_status.clone();

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.merge_grace,
            &self.cancel,
            || {
                // Dropped out of the open list without us merging it means
                // another actor merged or closed it; the merge call below
                // settles which, since the host is the authority.
                let current = self.current_state(mr)?.unwrap_or_else(|| mr.clone());
                last_status = current.merge_status.clone();

                if current.has_conflicts {
                    return Err(ValidateError::HasConflicts {
                        project: current.project.clone(),
                        iid: current.iid,
                        source_branch: current.source_branch.clone(),
                    });
                }

                if matches!(
                    current.merge_status,
                    MergeStatus::Checking | MergeStatus::Unchecked
                ) {
                    return Ok(Step::Pending);
                }

                match self.client.merge(&mr.project, mr.iid) {
                    Ok(merged) => Ok(Step::Ready(merged)),
                    Err(error) if error.is_retryable() => Ok(Step::Pending),
                    Err(error) if error.is_transient() => {
                        Ok(Step::Transient(error.to_string()))
                    },
                    Err(error) => Err(error),
                }
            },
        )?;

        let merged = outcome.into_result(
            |_waited| ValidateError::NotMergeableYet {
                project: mr.project.clone(),
                iid: mr.iid,
                status: last_status.to_string(),
            },
            || ValidateError::Cancelled {
                stage: format!("merge (!{})", mr.iid),
            },
        )?;

        info!(
            project = %mr.project,
            iid = mr.iid,
            source = %mr.source_branch,
            "merge request merged"
        );
        Ok(merged)
    }

    /// Re-reads the MR's current state from the open-MR list.
    fn current_state(
        &self,
        mr: &MergeRequest,
    ) -> Result<Option<MergeRequest>, ValidateError> {
        match self
            .client
            .open_merge_requests(&mr.project, &mr.target_branch)
        {
            Ok(open) => Ok(open.into_iter().find(|candidate| candidate.iid == mr.iid)),
            Err(error) if error.is_transient() => {
                warn!(%error, "transient failure re-reading merge request state");
                Ok(Some(mr.clone()))
            },
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::forge::{MergeRequest, MergeStatus, MockForgeClient};

    fn fast_config() -> ResolverConfig {
        ResolverConfig {
            find_timeout: Duration::from_millis(50),
            merge_grace: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn mr(iid: u64, source: &str, created: &str) -> MergeRequest {
        MergeRequest {
            project: "group/app".to_string(),
            iid,
            source_branch: source.to_string(),
            target_branch: "main".to_string(),
            created_at: DateTime::parse_from_rfc3339(created)
                .unwrap()
                .with_timezone(&Utc),
            has_conflicts: false,
            merge_status: MergeStatus::CanBeMerged,
        }
    }

    #[test]
    fn finds_only_the_fingerprint_matched_mr() {
        let client = MockForgeClient::scripted(vec![vec![
            mr(1, "update-dev-1.2.3-abcd123", "2024-05-01T10:00:00Z"),
            mr(2, "update-dev-1.2.2-ffff000", "2024-05-01T09:00:00Z"),
        ]]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        let found = resolver
            .find("group/app", "main", "update-dev-1.2.3-", None)
            .unwrap();
        assert_eq!(found.iid, 1);
    }

    #[test]
    fn missing_mr_reports_candidates_seen() {
        let client = MockForgeClient::scripted(vec![vec![mr(
            2,
            "update-dev-1.2.2-ffff000",
            "2024-05-01T09:00:00Z",
        )]]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        let error = resolver
            .find("group/app", "main", "update-dev-1.2.3-", None)
            .unwrap_err();
        match error {
            ValidateError::MergeRequestNotFound { candidates, .. } => {
                assert_eq!(candidates, vec!["update-dev-1.2.2-ffff000".to_string()]);
            },
            other => panic!("expected MergeRequestNotFound, got {other}"),
        }
    }

    #[test]
    fn mr_appearing_mid_poll_is_found() {
        let client = MockForgeClient::scripted(vec![
            vec![],
            vec![],
            vec![mr(1, "promote-stage-1714540000", "2024-05-01T10:00:00Z")],
        ]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        let found = resolver
            .find("group/app", "main", "promote-stage-", None)
            .unwrap();
        assert_eq!(found.iid, 1);
    }

    #[test]
    fn merge_waits_out_mergeability_checking() {
        let mut checking = mr(5, "update-dev-1.2.3-abcd123", "2024-05-01T10:00:00Z");
        checking.merge_status = MergeStatus::Checking;
        let ready = mr(5, "update-dev-1.2.3-abcd123", "2024-05-01T10:00:00Z");

        let client = MockForgeClient::scripted(vec![
            vec![checking.clone()],
            vec![checking.clone()],
            vec![ready],
        ]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        let merged = resolver.merge(&checking).unwrap();
        assert_eq!(merged.iid, 5);
        assert_eq!(client.merged(), vec![5]);
    }

    #[test]
    fn merge_escalates_when_grace_window_closes() {
        let mut checking = mr(5, "update-dev-1.2.3-abcd123", "2024-05-01T10:00:00Z");
        checking.merge_status = MergeStatus::Checking;

        let client = MockForgeClient::scripted(vec![vec![checking.clone()]]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        let error = resolver.merge(&checking).unwrap_err();
        assert!(matches!(
            error,
            ValidateError::NotMergeableYet { iid: 5, .. }
        ));
        assert!(client.merged().is_empty());
    }

    #[test]
    fn conflicts_are_fatal_without_retry() {
        let mut conflicted = mr(5, "update-dev-1.2.3-abcd123", "2024-05-01T10:00:00Z");
        conflicted.has_conflicts = true;

        let client = MockForgeClient::scripted(vec![vec![conflicted.clone()]]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        assert!(matches!(
            resolver.merge(&conflicted),
            Err(ValidateError::HasConflicts { iid: 5, .. })
        ));
    }

    #[test]
    fn conflict_appearing_mid_grace_is_fatal() {
        let mut checking = mr(5, "update-dev-1.2.3-abcd123", "2024-05-01T10:00:00Z");
        checking.merge_status = MergeStatus::Checking;
        let mut conflicted = checking.clone();
        conflicted.has_conflicts = true;

        let client =
            MockForgeClient::scripted(vec![vec![checking.clone()], vec![conflicted]]);
        let resolver = MergeRequestResolver::new(&client, fast_config(), CancelToken::new());

        assert!(matches!(
            resolver.merge(&checking),
            Err(ValidateError::HasConflicts { iid: 5, .. })
        ));
    }
}
