//! Kubernetes-style orchestrator client over HTTP.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{PodInfo, PodPhase, WorkloadClient};
use crate::error::ValidateError;

const SYSTEM: &str = "workload";

/// Wire shape of a pod list.
#[derive(Debug, Deserialize)]
struct PodListPayload {
    #[serde(default)]
    items: Vec<PodPayload>,
}

#[derive(Debug, Deserialize)]
struct PodPayload {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatusPayload,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PodStatusPayload {
    phase: Option<String>,
    #[serde(rename = "containerStatuses")]
    container_statuses: Vec<ContainerStatusPayload>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatusPayload {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    image: String,
}

/// Kubernetes-style API client authenticated with a bearer token.
#[derive(Debug)]
pub struct KubeClient {
    base_url: String,
    token: SecretString,
    http: reqwest::blocking::Client,
}

impl KubeClient {
    /// Creates a client for the given API server base URL.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the base URL is empty, or an `Http`
    /// error when the HTTP client cannot be initialized.
    pub fn new(
        base_url: impl Into<String>,
        token: SecretString,
    ) -> Result<Self, ValidateError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(ValidateError::InvalidInput {
                field: "workload.base_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| ValidateError::Http {
                system: SYSTEM.to_string(),
                status: None,
                message: error.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, ValidateError> {
        self.http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .map_err(|error| ValidateError::Http {
                system: SYSTEM.to_string(),
                status: None,
                message: error.to_string(),
            })
    }
}

impl From<PodPayload> for PodInfo {
    fn from(payload: PodPayload) -> Self {
        let ready = !payload.status.container_statuses.is_empty()
            && payload.status.container_statuses.iter().all(|c| c.ready);
        let image = payload
            .status
            .container_statuses
            .first()
            .map(|c| c.image.clone())
            .unwrap_or_default();
        Self {
            name: payload.metadata.name,
            phase: payload
                .status
                .phase
                .as_deref()
                .map_or(PodPhase::Unknown, PodPhase::parse),
            ready,
            image,
        }
    }
}

impl WorkloadClient for KubeClient {
    fn pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, ValidateError> {
        let url = format!(
            "{}/api/v1/namespaces/{namespace}/pods?labelSelector={label_selector}",
            self.base_url
        );
        let response = self.get(&url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ValidateError::Http {
                system: SYSTEM.to_string(),
                status: Some(status.as_u16()),
                message: response
                    .text()
                    .unwrap_or_else(|_| "unable to read response body".to_string()),
            });
        }

        let payload: PodListPayload =
            response.json().map_err(|error| ValidateError::Decode {
                system: SYSTEM.to_string(),
                message: error.to_string(),
            })?;
        Ok(payload.items.into_iter().map(PodInfo::from).collect())
    }

    fn ping(&self) -> Result<(), ValidateError> {
        let url = format!("{}/version", self.base_url);
        let response = self.get(&url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ValidateError::Http {
                system: SYSTEM.to_string(),
                status: Some(status.as_u16()),
                message: "authentication or reachability probe failed".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pod_list() {
        let payload: PodListPayload = serde_json::from_str(
            r#"{
                "items": [{
                    "metadata": {"name": "app-6b7f"},
                    "status": {
                        "phase": "Running",
                        "containerStatuses": [
                            {"ready": true, "image": "registry/app:1.2.3-abcd123"}
                        ]
                    }
                }]
            }"#,
        )
        .unwrap();
        let pod: PodInfo = payload.items.into_iter().next().unwrap().into();
        assert_eq!(pod.name, "app-6b7f");
        assert_eq!(pod.phase, PodPhase::Running);
        assert!(pod.ready);
        assert_eq!(pod.image, "registry/app:1.2.3-abcd123");
    }

    #[test]
    fn pod_without_container_statuses_is_not_ready() {
        let payload: PodPayload = serde_json::from_str(
            r#"{"metadata": {"name": "app-x"}, "status": {"phase": "Pending"}}"#,
        )
        .unwrap();
        let pod: PodInfo = payload.into();
        assert!(!pod.ready);
        assert_eq!(pod.phase, PodPhase::Pending);
        assert!(pod.image.is_empty());
    }

    #[test]
    fn any_unready_container_marks_pod_unready() {
        let payload: PodPayload = serde_json::from_str(
            r#"{
                "metadata": {"name": "app-y"},
                "status": {
                    "phase": "Running",
                    "containerStatuses": [
                        {"ready": true, "image": "a"},
                        {"ready": false, "image": "b"}
                    ]
                }
            }"#,
        )
        .unwrap();
        let pod: PodInfo = payload.into();
        assert!(!pod.ready);
    }
}
