//! Jenkins-style CI client over HTTP.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{BuildResult, BuildSnapshot, CiClient, tail_lines};
use crate::error::ValidateError;

const SYSTEM: &str = "ci";

/// Wire shape of a build resource.
#[derive(Debug, Deserialize)]
struct BuildPayload {
    number: u64,
    building: bool,
    result: Option<String>,
}

/// Wire shape of a job resource (queue probe).
#[derive(Debug, Deserialize)]
struct JobPayload {
    #[serde(rename = "inQueue", default)]
    in_queue: bool,
}

/// Jenkins-style CI client authenticated with user + API token.
#[derive(Debug)]
pub struct JenkinsClient {
    base_url: String,
    user: String,
    token: SecretString,
    http: reqwest::blocking::Client,
}

impl JenkinsClient {
    /// Creates a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the base URL or user is empty, or an
    /// `Http` error when the HTTP client cannot be initialized.
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        token: SecretString,
    ) -> Result<Self, ValidateError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(ValidateError::InvalidInput {
                field: "ci.base_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let user = user.into();
        if user.trim().is_empty() {
            return Err(ValidateError::InvalidInput {
                field: "ci.user".to_string(),
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
            user,
            token,
            http,
        })
    }

    /// Expands a slash-separated job path into the folder-aware URL form:
    /// `deploy/app` becomes `job/deploy/job/app`.
    fn job_url(&self, job: &str) -> String {
        let path: Vec<String> = job
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| format!("job/{segment}"))
            .collect();
        format!("{}/{}", self.base_url, path.join("/"))
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, ValidateError> {
        self.http
            .get(url)
            .basic_auth(&self.user, Some(self.token.expose_secret()))
            .send()
            .map_err(|error| ValidateError::Http {
                system: SYSTEM.to_string(),
                status: None,
                message: error.to_string(),
            })
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ValidateError> {
        let response = self.get(url)?;
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
        response.json().map_err(|error| ValidateError::Decode {
            system: SYSTEM.to_string(),
            message: error.to_string(),
        })
    }
}

impl From<BuildPayload> for BuildSnapshot {
    fn from(payload: BuildPayload) -> Self {
        Self {
            number: payload.number,
            building: payload.building,
            result: payload.result.as_deref().map(BuildResult::parse),
        }
    }
}

impl CiClient for JenkinsClient {
    fn last_build(&self, job: &str) -> Result<Option<BuildSnapshot>, ValidateError> {
        let url = format!("{}/lastBuild/api/json", self.job_url(job));
        let response = self.get(&url)?;
        let status = response.status();
        // A job that exists but has never run answers 404 on lastBuild.
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ValidateError::Http {
                system: SYSTEM.to_string(),
                status: Some(status.as_u16()),
                message: response
                    .text()
                    .unwrap_or_else(|_| "unable to read response body".to_string()),
            });
        }
        let payload: BuildPayload =
            response.json().map_err(|error| ValidateError::Decode {
                system: SYSTEM.to_string(),
                message: error.to_string(),
            })?;
        Ok(Some(payload.into()))
    }

    fn build(&self, job: &str, number: u64) -> Result<BuildSnapshot, ValidateError> {
        let url = format!("{}/{number}/api/json", self.job_url(job));
        let payload: BuildPayload = self.get_json(&url)?;
        Ok(payload.into())
    }

    fn console_tail(
        &self,
        job: &str,
        number: u64,
        lines: usize,
    ) -> Result<String, ValidateError> {
        let url = format!("{}/{number}/consoleText", self.job_url(job));
        let response = self.get(&url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ValidateError::Http {
                system: SYSTEM.to_string(),
                status: Some(status.as_u16()),
                message: "unable to fetch console text".to_string(),
            });
        }
        let text = response.text().map_err(|error| ValidateError::Http {
            system: SYSTEM.to_string(),
            status: None,
            message: error.to_string(),
        })?;
        Ok(tail_lines(&text, lines))
    }

    fn has_queued_builds(&self, job: &str) -> Result<bool, ValidateError> {
        let url = format!("{}/api/json", self.job_url(job));
        let payload: JobPayload = self.get_json(&url)?;
        Ok(payload.in_queue)
    }

    fn ping(&self) -> Result<(), ValidateError> {
        let url = format!("{}/api/json", self.base_url);
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
    fn job_url_expands_folders() {
        let client = JenkinsClient::new(
            "https://ci.example.com/",
            "validator",
            SecretString::from("token"),
        )
        .unwrap();
        assert_eq!(
            client.job_url("deploy/app/main"),
            "https://ci.example.com/job/deploy/job/app/job/main"
        );
    }

    #[test]
    fn rejects_empty_base_url_and_user() {
        assert!(matches!(
            JenkinsClient::new("", "user", SecretString::from("t")),
            Err(ValidateError::InvalidInput { field, .. }) if field == "ci.base_url"
        ));
        assert!(matches!(
            JenkinsClient::new("https://ci", " ", SecretString::from("t")),
            Err(ValidateError::InvalidInput { field, .. }) if field == "ci.user"
        ));
    }

    #[test]
    fn build_payload_maps_to_snapshot() {
        let payload: BuildPayload = serde_json::from_str(
            r#"{"number": 6, "building": false, "result": "SUCCESS"}"#,
        )
        .unwrap();
        let snapshot: BuildSnapshot = payload.into();
        assert_eq!(snapshot.number, 6);
        assert!(!snapshot.building);
        assert_eq!(snapshot.result, Some(BuildResult::Success));
    }

    #[test]
    fn running_build_has_no_result() {
        let payload: BuildPayload =
            serde_json::from_str(r#"{"number": 6, "building": true, "result": null}"#)
                .unwrap();
        let snapshot: BuildSnapshot = payload.into();
        assert!(snapshot.building);
        assert!(snapshot.result.is_none());
    }
}
