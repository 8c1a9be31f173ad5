//! Argo CD-style GitOps controller client over HTTP.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{AppState, GitOpsClient, HealthStatus, SyncStatus};
use crate::error::ValidateError;

const SYSTEM: &str = "gitops";

/// Wire shape of an application resource (status subtree only).
#[derive(Debug, Deserialize)]
struct ApplicationPayload {
    status: StatusPayload,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StatusPayload {
    sync: SyncPayload,
    health: HealthPayload,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SyncPayload {
    status: Option<String>,
    revision: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HealthPayload {
    status: Option<String>,
}

/// Argo CD-style controller client authenticated with a bearer token.
#[derive(Debug)]
pub struct ArgoClient {
    base_url: String,
    token: SecretString,
    http: reqwest::blocking::Client,
}

impl ArgoClient {
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
                field: "gitops.base_url".to_string(),
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

    fn app_url(&self, name: &str) -> String {
        format!("{}/api/v1/applications/{name}", self.base_url)
    }
}

impl GitOpsClient for ArgoClient {
    fn application(&self, name: &str) -> Result<AppState, ValidateError> {
        let response = self
            .http
            .get(self.app_url(name))
            .bearer_auth(self.token.expose_secret())
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

        let payload: ApplicationPayload =
            response.json().map_err(|error| ValidateError::Decode {
                system: SYSTEM.to_string(),
                message: error.to_string(),
            })?;

        Ok(AppState {
            app: name.to_string(),
            sync_status: payload
                .status
                .sync
                .status
                .as_deref()
                .map_or(SyncStatus::Unknown, SyncStatus::parse),
            health_status: payload
                .status
                .health
                .status
                .as_deref()
                .map_or(HealthStatus::Unknown, HealthStatus::parse),
            revision: payload.status.sync.revision.unwrap_or_default(),
        })
    }

    fn refresh(&self, name: &str) -> Result<(), ValidateError> {
        let response = self
            .http
            .post(format!("{}/refresh", self.app_url(name)))
            .bearer_auth(self.token.expose_secret())
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
                message: "refresh rejected".to_string(),
            });
        }
        Ok(())
    }

    fn ping(&self) -> Result<(), ValidateError> {
        let url = format!("{}/api/v1/session/userinfo", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token.expose_secret())
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
    fn decodes_full_status_payload() {
        let payload: ApplicationPayload = serde_json::from_str(
            r#"{
                "status": {
                    "sync": {"status": "Synced", "revision": "r2"},
                    "health": {"status": "Healthy"}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(payload.status.sync.status.as_deref(), Some("Synced"));
        assert_eq!(payload.status.sync.revision.as_deref(), Some("r2"));
        assert_eq!(payload.status.health.status.as_deref(), Some("Healthy"));
    }

    #[test]
    fn missing_status_fields_default_to_unknown() {
        let payload: ApplicationPayload =
            serde_json::from_str(r#"{"status": {}}"#).unwrap();
        assert!(payload.status.sync.status.is_none());
        assert!(payload.status.health.status.is_none());
    }

    #[test]
    fn app_url_is_versioned() {
        let client =
            ArgoClient::new("https://argocd.example.com/", SecretString::from("t")).unwrap();
        assert_eq!(
            client.app_url("app-dev"),
            "https://argocd.example.com/api/v1/applications/app-dev"
        );
    }
}
