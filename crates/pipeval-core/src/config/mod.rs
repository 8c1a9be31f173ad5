//! Validator configuration.
//!
//! One TOML file describes the four external systems, the environment
//! chain, and every phase timeout. Credentials are referenced by
//! environment-variable name and resolved into [`SecretString`] once at
//! startup; no literal secret ever appears in the file or in `Debug`
//! output. There is no process-wide mutable state: the parsed config (and
//! the credentials resolved from it) are passed explicitly to each
//! component.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ci::BuildWaiterConfig;
use crate::forge::ResolverConfig;
use crate::gitops::SyncWaiterConfig;
use crate::workload::VerifierConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML did not parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but is semantically invalid.
    #[error("invalid config: {0}")]
    Validation(String),

    /// A referenced credential variable is unset or empty.
    #[error("credential variable {var} is unset or empty")]
    MissingCredential {
        /// Name of the environment variable.
        var: String,
    },
}

/// Top-level validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Ordered environment chain, first entry is where the change lands.
    pub chain: Vec<String>,

    /// CI system settings.
    pub ci: CiSettings,

    /// Merge-request host settings.
    pub forge: ForgeSettings,

    /// GitOps controller settings.
    pub gitops: GitOpsSettings,

    /// Container orchestrator settings.
    pub workload: WorkloadSettings,

    /// Phase timeouts and poll cadence.
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Promotion cascade policy.
    #[serde(default)]
    pub promotion: PromotionSettings,

    /// Per-environment overrides, keyed by environment name.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvOverrides>,
}

/// CI system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiSettings {
    /// Base URL of the CI system.
    pub base_url: String,
    /// User for basic auth.
    pub user: String,
    /// Environment variable holding the API token.
    #[serde(default = "default_ci_token_env")]
    pub token_env: String,
    /// Job path template for the application build, `{env}` substituted.
    #[serde(default = "default_app_job")]
    pub app_job: String,
    /// Job path template for the manifest build, `{env}` substituted.
    #[serde(default = "default_manifest_job")]
    pub manifest_job: String,
    /// Console lines attached to build-failure diagnostics.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

/// Merge-request host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeSettings {
    /// Base URL of the host.
    pub base_url: String,
    /// Environment variable holding the private token.
    #[serde(default = "default_forge_token_env")]
    pub token_env: String,
    /// Project id or `group/name` path of the deployment repository.
    pub project: String,
    /// Branch the update and promotion MRs target.
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
}

/// GitOps controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOpsSettings {
    /// Base URL of the controller API.
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_gitops_token_env")]
    pub token_env: String,
    /// Application name template, `{env}` substituted.
    #[serde(default = "default_app_name")]
    pub app: String,
}

/// Container orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Base URL of the orchestrator API server.
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_workload_token_env")]
    pub token_env: String,
    /// Namespace template, `{env}` substituted.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Label selector identifying the application's pods.
    pub selector: String,
}

/// Phase timeouts, in seconds. Every phase owns an independent budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Budget for a new build to appear past its baseline.
    pub build_start_secs: u64,
    /// Budget for a detected build to finish.
    pub build_run_secs: u64,
    /// Budget for an update MR to appear.
    pub mr_find_secs: u64,
    /// Grace window for mergeability computation.
    pub merge_grace_secs: u64,
    /// Budget for a promotion MR to appear.
    pub promotion_find_secs: u64,
    /// Budget for an application to sync on a new revision.
    pub sync_secs: u64,
    /// Budget for the expected artifact to be observed running.
    pub deploy_secs: u64,
    /// Sleep between polls, shared by all phases.
    pub poll_interval_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            build_start_secs: 120,
            build_run_secs: 1200,
            mr_find_secs: 180,
            merge_grace_secs: 60,
            promotion_find_secs: 300,
            sync_secs: 600,
            deploy_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

/// Promotion cascade policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionSettings {
    /// Whether a missing promotion MR fails the run. Silent absence
    /// usually indicates a broken trigger, so the default is fatal.
    pub mandatory: bool,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self { mandatory: true }
    }
}

/// Optional per-environment overrides of the templated names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvOverrides {
    /// Application build job path.
    pub app_job: Option<String>,
    /// Manifest build job path.
    pub manifest_job: Option<String>,
    /// GitOps application name.
    pub app: Option<String>,
    /// Namespace.
    pub namespace: Option<String>,
    /// Label selector.
    pub selector: Option<String>,
}

/// Fully-resolved settings for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    /// Environment name.
    pub env: String,
    /// Application build job path.
    pub app_job: String,
    /// Manifest build job path.
    pub manifest_job: String,
    /// GitOps application name.
    pub app: String,
    /// Namespace.
    pub namespace: String,
    /// Label selector.
    pub selector: String,
}

/// Credentials resolved once at startup, immutable for the run.
pub struct Credentials {
    /// CI API token.
    pub ci_token: SecretString,
    /// Merge-request host token.
    pub forge_token: SecretString,
    /// GitOps controller token.
    pub gitops_token: SecretString,
    /// Orchestrator token.
    pub workload_token: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials { [REDACTED] }")
    }
}

impl ValidatorConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid, the chain is empty or
    /// has duplicates, or a required field is blank.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.is_empty() {
            return Err(ConfigError::Validation(
                "chain must name at least one environment".to_string(),
            ));
        }
        for (index, env) in self.chain.iter().enumerate() {
            if env.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "chain entries must not be empty".to_string(),
                ));
            }
            if self.chain[..index].contains(env) {
                return Err(ConfigError::Validation(format!(
                    "environment {env} appears twice in the chain"
                )));
            }
        }
        for (field, value) in [
            ("ci.base_url", &self.ci.base_url),
            ("ci.user", &self.ci.user),
            ("forge.base_url", &self.forge.base_url),
            ("forge.project", &self.forge.project),
            ("gitops.base_url", &self.gitops.base_url),
            ("workload.base_url", &self.workload.base_url),
            ("workload.selector", &self.workload.selector),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{field} must not be empty"
                )));
            }
        }
        if self.timeouts.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "timeouts.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the templated names for `env`, applying overrides.
    #[must_use]
    pub fn env_settings(&self, env: &str) -> EnvSettings {
        let overrides = self.environments.get(env).cloned().unwrap_or_default();
        let fill = |template: &str| template.replace("{env}", env);
        EnvSettings {
            env: env.to_string(),
            app_job: overrides.app_job.unwrap_or_else(|| fill(&self.ci.app_job)),
            manifest_job: overrides
                .manifest_job
                .unwrap_or_else(|| fill(&self.ci.manifest_job)),
            app: overrides.app.unwrap_or_else(|| fill(&self.gitops.app)),
            namespace: overrides
                .namespace
                .unwrap_or_else(|| fill(&self.workload.namespace)),
            selector: overrides
                .selector
                .unwrap_or_else(|| self.workload.selector.clone()),
        }
    }

    /// Reads the referenced credential variables into memory.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` naming the first variable that is
    /// unset or empty.
    pub fn resolve_credentials(&self) -> Result<Credentials, ConfigError> {
        Ok(Credentials {
            ci_token: read_credential(&self.ci.token_env)?,
            forge_token: read_credential(&self.forge.token_env)?,
            gitops_token: read_credential(&self.gitops.token_env)?,
            workload_token: read_credential(&self.workload.token_env)?,
        })
    }

    /// Build-waiter settings derived from the timeout table.
    #[must_use]
    pub fn build_waiter(&self) -> BuildWaiterConfig {
        BuildWaiterConfig {
            start_timeout: Duration::from_secs(self.timeouts.build_start_secs),
            run_timeout: Duration::from_secs(self.timeouts.build_run_secs),
            poll_interval: self.poll_interval(),
            log_tail_lines: self.ci.log_tail_lines,
        }
    }

    /// Resolver settings for update MRs.
    #[must_use]
    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            find_timeout: Duration::from_secs(self.timeouts.mr_find_secs),
            merge_grace: Duration::from_secs(self.timeouts.merge_grace_secs),
            poll_interval: self.poll_interval(),
        }
    }

    /// Resolver settings for promotion MRs (longer find budget: the MR is
    /// created by a downstream pipeline, not a human).
    #[must_use]
    pub fn promotion_resolver(&self) -> ResolverConfig {
        ResolverConfig {
            find_timeout: Duration::from_secs(self.timeouts.promotion_find_secs),
            merge_grace: Duration::from_secs(self.timeouts.merge_grace_secs),
            poll_interval: self.poll_interval(),
        }
    }

    /// Sync-waiter settings derived from the timeout table.
    #[must_use]
    pub fn sync_waiter(&self) -> SyncWaiterConfig {
        SyncWaiterConfig {
            timeout: Duration::from_secs(self.timeouts.sync_secs),
            poll_interval: self.poll_interval(),
        }
    }

    /// Verifier settings derived from the timeout table.
    #[must_use]
    pub fn verifier(&self) -> VerifierConfig {
        VerifierConfig {
            timeout: Duration::from_secs(self.timeouts.deploy_secs),
            poll_interval: self.poll_interval(),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.timeouts.poll_interval_secs)
    }
}

fn read_credential(var: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::MissingCredential {
            var: var.to_string(),
        }),
    }
}

fn default_ci_token_env() -> String {
    "PIPEVAL_CI_TOKEN".to_string()
}

fn default_forge_token_env() -> String {
    "PIPEVAL_FORGE_TOKEN".to_string()
}

fn default_gitops_token_env() -> String {
    "PIPEVAL_GITOPS_TOKEN".to_string()
}

fn default_workload_token_env() -> String {
    "PIPEVAL_WORKLOAD_TOKEN".to_string()
}

fn default_app_job() -> String {
    "build/app".to_string()
}

fn default_manifest_job() -> String {
    "manifests/{env}".to_string()
}

fn default_target_branch() -> String {
    "main".to_string()
}

fn default_app_name() -> String {
    "app-{env}".to_string()
}

fn default_namespace() -> String {
    "{env}".to_string()
}

fn default_log_tail_lines() -> usize {
    50
}
