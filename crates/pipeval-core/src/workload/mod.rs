//! Workload observation on the container orchestrator.
//!
//! Deployment verification confirms the orchestrator is actually running
//! the expected artifact, not merely that the GitOps controller believes
//! it applied the manifests. During a rolling update old and new pods
//! coexist, so verification matches the *first* ready pod carrying the
//! expected image tag rather than requiring all pods to agree.

mod kube;
mod verifier;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

pub use kube::KubeClient;
use serde::{Deserialize, Serialize};
pub use verifier::{DeploymentRecord, DeploymentVerifier, VerifierConfig};

use crate::error::ValidateError;

/// Pod lifecycle phase as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Scheduled but not all containers started.
    Pending,
    /// All containers started.
    Running,
    /// Terminated successfully.
    Succeeded,
    /// Terminated with a failure.
    Failed,
    /// State could not be obtained.
    Unknown,
}

impl PodPhase {
    /// Parses the orchestrator's phase string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Running => f.write_str("Running"),
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed => f.write_str("Failed"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// One observed pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Lifecycle phase.
    pub phase: PodPhase,
    /// Whether every container reports ready.
    pub ready: bool,
    /// Image reference of the pod's primary container.
    pub image: String,
}

impl PodInfo {
    /// One-line snapshot form used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{} phase={} ready={} image={}",
            self.name, self.phase, self.ready, self.image
        )
    }
}

/// Read-only client for the orchestrator's pod API.
pub trait WorkloadClient: Send + Sync {
    /// Pods in `namespace` matching `label_selector`.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or the response cannot be
    /// decoded.
    fn pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, ValidateError>;

    /// Read-only reachability and authentication probe.
    ///
    /// # Errors
    ///
    /// Returns an error when the orchestrator is unreachable or rejects
    /// the credentials.
    fn ping(&self) -> Result<(), ValidateError>;
}

/// Scripted workload client for tests.
///
/// Each [`WorkloadClient::pods`] call consumes the next scripted listing;
/// the final listing repeats once the script is exhausted.
#[derive(Debug, Default)]
pub struct MockWorkloadClient {
    listings: Mutex<VecDeque<Vec<PodInfo>>>,
}

impl MockWorkloadClient {
    /// A client that replays `listings` in order.
    #[must_use]
    pub fn scripted(listings: Vec<Vec<PodInfo>>) -> Self {
        Self {
            listings: Mutex::new(listings.into()),
        }
    }
}

impl WorkloadClient for MockWorkloadClient {
    fn pods(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<PodInfo>, ValidateError> {
        let mut listings = self.listings.lock().expect("mock listing lock poisoned");
        Ok(if listings.len() > 1 {
            listings.pop_front().unwrap_or_default()
        } else {
            listings.front().cloned().unwrap_or_default()
        })
    }

    fn ping(&self) -> Result<(), ValidateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parses_known_and_unknown() {
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse("Pending"), PodPhase::Pending);
        assert_eq!(PodPhase::parse("Evicted"), PodPhase::Unknown);
    }

    #[test]
    fn describe_is_one_line() {
        let pod = PodInfo {
            name: "app-6b7f".to_string(),
            phase: PodPhase::Running,
            ready: true,
            image: "registry.example.com/app:1.2.3-abcd123".to_string(),
        };
        assert_eq!(
            pod.describe(),
            "app-6b7f phase=Running ready=true image=registry.example.com/app:1.2.3-abcd123"
        );
    }
}
