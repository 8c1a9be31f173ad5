//! GitLab-style merge-request host client over HTTP.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ForgeClient, MergeRequest, MergeStatus};
use crate::error::ValidateError;

const SYSTEM: &str = "forge";

/// Wire shape of a merge request resource.
#[derive(Debug, Deserialize)]
struct MergeRequestPayload {
    iid: u64,
    source_branch: String,
    target_branch: String,
    created_at: String,
    #[serde(default)]
    has_conflicts: bool,
    #[serde(default)]
    merge_status: Option<String>,
}

/// GitLab-style host client authenticated with a private token.
#[derive(Debug)]
pub struct GitLabClient {
    base_url: String,
    token: SecretString,
    http: reqwest::blocking::Client,
}

impl GitLabClient {
    /// Creates a client for the given base URL.
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
                field: "forge.base_url".to_string(),
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

    fn project_url(&self, project: &str) -> String {
        // Path-style project ids must be URL-encoded ("group/app" ->
        // "group%2Fapp"); numeric ids pass through unchanged.
        let encoded = project.replace('/', "%2F");
        format!("{}/api/v4/projects/{encoded}", self.base_url)
    }

    fn decode_mr(
        project: &str,
        payload: MergeRequestPayload,
    ) -> Result<MergeRequest, ValidateError> {
        let created_at = DateTime::parse_from_rfc3339(&payload.created_at)
            .map_err(|error| ValidateError::Decode {
                system: SYSTEM.to_string(),
                message: format!(
                    "bad created_at {:?} on !{}: {error}",
                    payload.created_at, payload.iid
                ),
            })?
            .with_timezone(&Utc);

        Ok(MergeRequest {
            project: project.to_string(),
            iid: payload.iid,
            source_branch: payload.source_branch,
            target_branch: payload.target_branch,
            created_at,
            has_conflicts: payload.has_conflicts,
            merge_status: payload
                .merge_status
                .as_deref()
                .map_or(MergeStatus::Unchecked, MergeStatus::parse),
        })
    }
}

impl ForgeClient for GitLabClient {
    fn open_merge_requests(
        &self,
        project: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, ValidateError> {
        let url = format!(
            "{}/merge_requests?state=opened&target_branch={target_branch}",
            self.project_url(project)
        );
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", self.token.expose_secret())
            .send()
            .map_err(|error| ValidateError::Http {
                system: SYSTEM.to_string(),
                status: None,
                message: error.to_string(),
            })?;

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

        let payloads: Vec<MergeRequestPayload> =
            response.json().map_err(|error| ValidateError::Decode {
                system: SYSTEM.to_string(),
                message: error.to_string(),
            })?;
        payloads
            .into_iter()
            .map(|payload| Self::decode_mr(project, payload))
            .collect()
    }

    fn merge(&self, project: &str, iid: u64) -> Result<MergeRequest, ValidateError> {
        let url = format!("{}/merge_requests/{iid}/merge", self.project_url(project));
        let response = self
            .http
            .put(&url)
            .header("PRIVATE-TOKEN", self.token.expose_secret())
            .send()
            .map_err(|error| ValidateError::Http {
                system: SYSTEM.to_string(),
                status: None,
                message: error.to_string(),
            })?;

        let status = response.status();
        match status.as_u16() {
            // 405: merge blocked (mergeability still being computed, or
            // a gate is unsatisfied). Retried within the grace window.
            405 => Err(ValidateError::NotMergeableYet {
                project: project.to_string(),
                iid,
                status: "blocked".to_string(),
            }),
            // 406: the host established the MR cannot merge. Conflicts
            // need a human; never retried.
            406 => Err(ValidateError::HasConflicts {
                project: project.to_string(),
                iid,
                source_branch: String::new(),
            }),
            _ if !status.is_success() => Err(ValidateError::Http {
                system: SYSTEM.to_string(),
                status: Some(status.as_u16()),
                message: response
                    .text()
                    .unwrap_or_else(|_| "unable to read response body".to_string()),
            }),
            _ => {
                let payload: MergeRequestPayload =
                    response.json().map_err(|error| ValidateError::Decode {
                        system: SYSTEM.to_string(),
                        message: error.to_string(),
                    })?;
                Self::decode_mr(project, payload)
            },
        }
    }

    fn ping(&self) -> Result<(), ValidateError> {
        let url = format!("{}/api/v4/version", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", self.token.expose_secret())
            .send()
            .map_err(|error| ValidateError::Http {
                system: SYSTEM.to_string(),
                status: None,
                message: error.to_string(),
            })?;
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
    fn project_url_encodes_path_ids() {
        let client =
            GitLabClient::new("https://git.example.com/", SecretString::from("t")).unwrap();
        assert_eq!(
            client.project_url("group/app"),
            "https://git.example.com/api/v4/projects/group%2Fapp"
        );
        assert_eq!(
            client.project_url("42"),
            "https://git.example.com/api/v4/projects/42"
        );
    }

    #[test]
    fn decodes_wire_payload() {
        let payload: MergeRequestPayload = serde_json::from_str(
            r#"{
                "iid": 12,
                "source_branch": "update-dev-1.2.3-abcd123",
                "target_branch": "main",
                "created_at": "2024-05-01T10:00:00Z",
                "has_conflicts": false,
                "merge_status": "can_be_merged"
            }"#,
        )
        .unwrap();
        let mr = GitLabClient::decode_mr("group/app", payload).unwrap();
        assert_eq!(mr.iid, 12);
        assert_eq!(mr.merge_status, MergeStatus::CanBeMerged);
        assert!(!mr.has_conflicts);
    }

    #[test]
    fn missing_merge_status_is_unchecked() {
        let payload: MergeRequestPayload = serde_json::from_str(
            r#"{
                "iid": 3,
                "source_branch": "b",
                "target_branch": "main",
                "created_at": "2024-05-01T10:00:00Z"
            }"#,
        )
        .unwrap();
        let mr = GitLabClient::decode_mr("group/app", payload).unwrap();
        assert_eq!(mr.merge_status, MergeStatus::Unchecked);
    }

    #[test]
    fn bad_created_at_is_a_decode_error() {
        let payload = MergeRequestPayload {
            iid: 3,
            source_branch: "b".to_string(),
            target_branch: "main".to_string(),
            created_at: "yesterday".to_string(),
            has_conflicts: false,
            merge_status: None,
        };
        assert!(matches!(
            GitLabClient::decode_mr("group/app", payload),
            Err(ValidateError::Decode { .. })
        ));
    }
}
