//! Deployment verifier.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{PodPhase, WorkloadClient};
use crate::cancel::CancelToken;
use crate::error::ValidateError;
use crate::poll::{Step, poll_until};

/// Timeout and poll cadence for one deployment verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Budget for a matching ready pod to appear.
    pub timeout: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Evidence that the expected artifact is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Namespace the pod runs in.
    pub namespace: String,
    /// Name of the matching pod.
    pub pod: String,
    /// Full image reference observed on the pod.
    pub image: String,
}

/// Confirms the orchestrator runs a workload carrying the expected tag.
pub struct DeploymentVerifier<'a> {
    client: &'a dyn WorkloadClient,
    config: VerifierConfig,
    cancel: CancelToken,
}

impl<'a> DeploymentVerifier<'a> {
    /// Creates a verifier over `client`.
    #[must_use]
    pub const fn new(
        client: &'a dyn WorkloadClient,
        config: VerifierConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Polls pods until one is ready, running, and carries an image
    /// containing `expected_fragment`.
    ///
    /// First match wins. Requiring *all* pods to match would deadlock
    /// against rolling updates, where outgoing pods with the previous tag
    /// remain ready while the new ones come up.
    ///
    /// # Errors
    ///
    /// - `DeploymentNotObserved` with a snapshot of every pod's phase and
    ///   image when no match appears within the budget.
    /// - `Cancelled` when interrupted mid-poll.
    pub fn verify(
        &self,
        namespace: &str,
        label_selector: &str,
        expected_fragment: &str,
    ) -> Result<DeploymentRecord, ValidateError> {
        debug!(namespace, label_selector, expected_fragment, "verifying deployment");
        let mut snapshot: Vec<String> = Vec::new();

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.timeout,
            &self.cancel,
            || match self.client.pods(namespace, label_selector) {
                Ok(pods) => {
                    snapshot = pods.iter().map(super::PodInfo::describe).collect();
                    let matched = pods.into_iter().find(|pod| {
                        pod.ready
                            && pod.phase == PodPhase::Running
                            && pod.image.contains(expected_fragment)
                    });
                    match matched {
                        Some(pod) => Ok(Step::Ready(DeploymentRecord {
                            namespace: namespace.to_string(),
                            pod: pod.name,
                            image: pod.image,
                        })),
                        None => Ok(Step::Pending),
                    }
                },
                Err(error) if error.is_transient() => {
                    Ok(Step::Transient(error.to_string()))
                },
                Err(error) => Err(error),
            },
        )?;

        let record = outcome.into_result(
            |waited| ValidateError::DeploymentNotObserved {
                namespace: namespace.to_string(),
                expected: expected_fragment.to_string(),
                snapshot,
                waited,
            },
            || ValidateError::Cancelled {
                stage: format!("deployment verification ({namespace})"),
            },
        )?;

        info!(
            namespace,
            pod = %record.pod,
            image = %record.image,
            "expected artifact observed running"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{MockWorkloadClient, PodInfo};

    fn fast_config() -> VerifierConfig {
        VerifierConfig {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn pod(name: &str, phase: PodPhase, ready: bool, image: &str) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            phase,
            ready,
            image: image.to_string(),
        }
    }

    #[test]
    fn first_ready_pod_with_expected_tag_wins_during_rollout() {
        // Rolling update: an old ready pod with the previous tag coexists
        // with the new one. The old pod must not block verification.
        let client = MockWorkloadClient::scripted(vec![vec![
            pod("app-old", PodPhase::Running, true, "registry/app:1.2.2-ffff000"),
            pod("app-new", PodPhase::Running, true, "registry/app:1.2.3-abcd123"),
        ]]);
        let verifier = DeploymentVerifier::new(&client, fast_config(), CancelToken::new());

        let record = verifier.verify("dev", "app=app", "1.2.3-abcd123").unwrap();
        assert_eq!(record.pod, "app-new");
    }

    #[test]
    fn unready_matching_pod_does_not_verify() {
        let client = MockWorkloadClient::scripted(vec![vec![pod(
            "app-new",
            PodPhase::Pending,
            false,
            "registry/app:1.2.3-abcd123",
        )]]);
        let verifier = DeploymentVerifier::new(&client, fast_config(), CancelToken::new());

        let error = verifier.verify("dev", "app=app", "1.2.3-abcd123").unwrap_err();
        match error {
            ValidateError::DeploymentNotObserved { snapshot, .. } => {
                assert_eq!(snapshot.len(), 1);
                assert!(snapshot[0].contains("app-new"));
                assert!(snapshot[0].contains("Pending"));
            },
            other => panic!("expected DeploymentNotObserved, got {other}"),
        }
    }

    #[test]
    fn match_appearing_mid_poll_verifies() {
        let old = pod("app-old", PodPhase::Running, true, "registry/app:1.2.2-ffff000");
        let new = pod("app-new", PodPhase::Running, true, "registry/app:1.2.3-abcd123");
        let client = MockWorkloadClient::scripted(vec![
            vec![old.clone()],
            vec![old.clone(), new.clone()],
        ]);
        let verifier = DeploymentVerifier::new(&client, fast_config(), CancelToken::new());

        let record = verifier.verify("dev", "app=app", "1.2.3-abcd123").unwrap();
        assert_eq!(record.pod, "app-new");
    }

    #[test]
    fn empty_namespace_times_out_with_empty_snapshot() {
        let client = MockWorkloadClient::scripted(vec![vec![]]);
        let verifier = DeploymentVerifier::new(&client, fast_config(), CancelToken::new());

        let error = verifier.verify("dev", "app=app", "1.2.3-abcd123").unwrap_err();
        assert!(matches!(
            error,
            ValidateError::DeploymentNotObserved { ref snapshot, .. } if snapshot.is_empty()
        ));
    }
}
