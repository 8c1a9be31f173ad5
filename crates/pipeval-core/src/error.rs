//! Error taxonomy for pipeline validation.
//!
//! Every component returns its error with enough captured external state
//! (last known status fields, log tails, candidate lists) to diagnose the
//! failure without re-querying the external system. The orchestrator never
//! downgrades these: the first fatal error halts the run.

use std::time::Duration;

use thiserror::Error;

use crate::gitops::{HealthStatus, SyncStatus};

/// Errors that can occur while validating a pipeline run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidateError {
    /// No build newer than the captured baseline appeared in time.
    #[error(
        "no new build of {job} started within {waited:?} (baseline build #{baseline})"
    )]
    BuildNeverStarted {
        /// CI job path that was watched.
        job: String,
        /// Build number captured before the trigger.
        baseline: u64,
        /// How long the waiter polled.
        waited: Duration,
    },

    /// The observed build completed with a FAILURE result.
    #[error("build #{number} of {job} failed")]
    BuildFailed {
        /// CI job path.
        job: String,
        /// Build number that failed.
        number: u64,
        /// Tail of the console log for diagnosis.
        log_tail: String,
    },

    /// The observed build was aborted before completing.
    #[error("build #{number} of {job} was aborted")]
    BuildAborted {
        /// CI job path.
        job: String,
        /// Build number that was aborted.
        number: u64,
        /// Tail of the console log for diagnosis.
        log_tail: String,
    },

    /// No open merge request matched the expected source-branch prefix.
    #[error(
        "no open merge request with source branch prefix {prefix} targeting \
         {target_branch} in project {project}"
    )]
    MergeRequestNotFound {
        /// Project the search ran against.
        project: String,
        /// Target branch filter.
        target_branch: String,
        /// Source-branch prefix that had to match.
        prefix: String,
        /// Source branches of the open MRs seen on the last poll.
        candidates: Vec<String>,
    },

    /// The merge request reports a conflict state. Conflicts require human
    /// resolution, so this is never retried.
    #[error("merge request !{iid} ({source_branch}) has conflicts")]
    HasConflicts {
        /// Project containing the MR.
        project: String,
        /// MR iid.
        iid: u64,
        /// Source branch of the conflicted MR.
        source_branch: String,
    },

    /// The host was still computing mergeability when the grace window
    /// closed.
    #[error("merge request !{iid} not mergeable yet (status: {status})")]
    NotMergeableYet {
        /// Project containing the MR.
        project: String,
        /// MR iid.
        iid: u64,
        /// Last merge status reported by the host.
        status: String,
    },

    /// The GitOps application did not reach a synced, healthy state on a
    /// new revision in time.
    #[error(
        "application {app} did not sync within {waited:?} \
         (last: {sync_status}/{health_status} at revision {revision:?})"
    )]
    SyncTimeout {
        /// GitOps application name.
        app: String,
        /// Last observed sync status.
        sync_status: SyncStatus,
        /// Last observed health status.
        health_status: HealthStatus,
        /// Last observed revision.
        revision: String,
        /// How long the waiter polled.
        waited: Duration,
    },

    /// No ready workload instance carrying the expected artifact tag
    /// appeared in time.
    #[error(
        "no ready pod in {namespace} with image containing {expected:?} \
         within {waited:?}"
    )]
    DeploymentNotObserved {
        /// Namespace that was polled.
        namespace: String,
        /// Expected image tag fragment.
        expected: String,
        /// Phase and image of every pod seen on the last poll.
        snapshot: Vec<String>,
        /// How long the verifier polled.
        waited: Duration,
    },

    /// The downstream pipeline never created the expected promotion MR.
    #[error(
        "no promotion merge request with prefix {prefix} for environment \
         {env} within {waited:?}"
    )]
    PromotionMrNotFound {
        /// Target environment of the hop.
        env: String,
        /// Source-branch prefix that had to match.
        prefix: String,
        /// How long the resolver polled.
        waited: Duration,
    },

    /// The run was cancelled from outside (signal) during a poll loop.
    #[error("cancelled during stage {stage}")]
    Cancelled {
        /// Stage that was interrupted.
        stage: String,
    },

    /// A pre-flight reachability or authentication probe failed.
    #[error("preflight check against {system} failed: {reason}")]
    PreflightFailed {
        /// External system that failed the probe.
        system: String,
        /// Probe failure detail.
        reason: String,
    },

    /// An HTTP exchange with an external system failed non-transiently.
    #[error("{system} request failed ({}): {message}", status_label(.status))]
    Http {
        /// External system the request went to.
        system: String,
        /// HTTP status code, when a response was received.
        status: Option<u16>,
        /// Error message or response body excerpt.
        message: String,
    },

    /// A response body could not be decoded as the expected schema.
    #[error("{system} returned an undecodable response: {message}")]
    Decode {
        /// External system that produced the response.
        system: String,
        /// Decode failure detail.
        message: String,
    },

    /// Invalid input to a component.
    #[error("invalid input for {field}: {reason}")]
    InvalidInput {
        /// The field name.
        field: String,
        /// The reason it is invalid.
        reason: String,
    },

    /// Configuration could not be loaded or resolved.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no status".to_string(), |code| code.to_string())
}

impl ValidateError {
    /// Whether the error only means "not ready yet" within a grace window.
    ///
    /// `NotMergeableYet` is the single retryable case in the taxonomy; it
    /// is escalated to fatal once the resolver's grace window closes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotMergeableYet { .. })
    }

    /// Whether the error is a transient transport failure that a poll loop
    /// may retry within its phase deadline.
    ///
    /// Connection-level failures (no status), 5xx responses, and 429
    /// throttling are transient. Everything else (4xx responses, decode
    /// failures, the domain errors above) is fatal: retrying a 403 or a
    /// malformed body reproduces the same failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_renders_status_when_present() {
        let err = ValidateError::Http {
            system: "ci".to_string(),
            status: Some(503),
            message: "upstream unavailable".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("503"), "{rendered}");
        assert!(rendered.contains("upstream unavailable"), "{rendered}");
    }

    #[test]
    fn http_error_renders_without_status() {
        let err = ValidateError::Http {
            system: "ci".to_string(),
            status: None,
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("no status"));
    }

    #[test]
    fn only_not_mergeable_yet_is_retryable() {
        let retryable = ValidateError::NotMergeableYet {
            project: "p".to_string(),
            iid: 1,
            status: "checking".to_string(),
        };
        assert!(retryable.is_retryable());

        let fatal = ValidateError::HasConflicts {
            project: "p".to_string(),
            iid: 1,
            source_branch: "b".to_string(),
        };
        assert!(!fatal.is_retryable());
    }
}
