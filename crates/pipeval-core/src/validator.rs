//! Pipeline orchestrator.
//!
//! Sequences the whole validation: preflight → build → merge → manifest
//! build → sync → deploy → promotion cascade → postflight. The first
//! fatal error halts the sequence; every stage reached is reported, and
//! planned stages that were never reached are reported as skipped, so the
//! summary always shows the full picture.

use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::cascade::{PromotionCascade, PromotionStep};
use crate::ci::{BuildWaiter, CiClient, JenkinsClient, capture_build_baseline};
use crate::config::ValidatorConfig;
use crate::error::ValidateError;
use crate::fingerprint::{ChangeFingerprint, promote_branch_prefix};
use crate::forge::{ForgeClient, GitLabClient, MergeRequestResolver};
use crate::gitops::{ArgoClient, GitOpsClient, SyncWaiter, capture_sync_baseline};
use crate::report::{RunSummary, StageRecorder};
use crate::workload::{DeploymentVerifier, KubeClient, WorkloadClient};

/// The four external-system clients, held for the run's duration.
///
/// Replaces ambient per-system globals: every component receives the
/// context (or a client borrowed from it) explicitly.
pub struct ValidatorContext {
    /// CI system client.
    pub ci: Box<dyn CiClient>,
    /// Merge-request host client.
    pub forge: Box<dyn ForgeClient>,
    /// GitOps controller client.
    pub gitops: Box<dyn GitOpsClient>,
    /// Orchestrator client.
    pub workload: Box<dyn WorkloadClient>,
}

impl ValidatorContext {
    /// Assembles a context from explicit clients (mocks in tests).
    #[must_use]
    pub fn new(
        ci: Box<dyn CiClient>,
        forge: Box<dyn ForgeClient>,
        gitops: Box<dyn GitOpsClient>,
        workload: Box<dyn WorkloadClient>,
    ) -> Self {
        Self {
            ci,
            forge,
            gitops,
            workload,
        }
    }

    /// Builds production HTTP clients from the config, resolving the
    /// referenced credential variables once.
    ///
    /// # Errors
    ///
    /// Returns an error when a credential variable is unset or a client
    /// cannot be constructed.
    pub fn from_config(config: &ValidatorConfig) -> Result<Self, ValidateError> {
        let credentials = config.resolve_credentials()?;
        Ok(Self {
            ci: Box::new(JenkinsClient::new(
                &config.ci.base_url,
                &config.ci.user,
                credentials.ci_token,
            )?),
            forge: Box::new(GitLabClient::new(
                &config.forge.base_url,
                credentials.forge_token,
            )?),
            gitops: Box::new(ArgoClient::new(
                &config.gitops.base_url,
                credentials.gitops_token,
            )?),
            workload: Box::new(KubeClient::new(
                &config.workload.base_url,
                credentials.workload_token,
            )?),
        })
    }
}

/// Outcome of a full validation run: the summary plus the promotion steps
/// taken.
#[derive(Debug)]
pub struct RunOutcome {
    /// Per-stage reports and verdict.
    pub summary: RunSummary,
    /// Promotion hops performed (empty for a single-environment chain).
    pub promotions: Vec<PromotionStep>,
}

/// The entry-point orchestrator.
pub struct PipelineValidator {
    ctx: ValidatorContext,
    config: ValidatorConfig,
    cancel: CancelToken,
}

impl PipelineValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new(
        ctx: ValidatorContext,
        config: ValidatorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            ctx,
            config,
            cancel,
        }
    }

    /// Runs the full validation for `fingerprint`.
    ///
    /// Never panics and never returns early without a summary: the first
    /// fatal error is folded into its stage report, the remaining planned
    /// stages are marked skipped, and the summary carries the verdict.
    #[must_use]
    pub fn run(&self, fingerprint: &ChangeFingerprint) -> RunOutcome {
        let started = Instant::now();
        let mut recorder = StageRecorder::new();
        let mut promotions = Vec::new();

        let result = self.execute(fingerprint, &mut recorder, &mut promotions);
        let passed = result.is_ok();

        let recorded = recorder.recorded_labels();
        for label in self.planned_stages() {
            if !recorded.contains(&label) {
                recorder.skip(&label, "not reached");
            }
        }

        info!(
            passed,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "validation run finished"
        );
        RunOutcome {
            summary: recorder.finish(passed),
            promotions,
        }
    }

    /// Every stage label the run would produce if nothing failed, in
    /// order.
    fn planned_stages(&self) -> Vec<String> {
        let first = &self.config.chain[0];
        let mut labels = vec![
            "preflight".to_string(),
            format!("build ({first})"),
            format!("merge request ({first})"),
            format!("manifest build ({first})"),
            format!("sync ({first})"),
            format!("deploy ({first})"),
        ];
        for to_env in &self.config.chain[1..] {
            labels.push(format!("promotion ({to_env})"));
            labels.push(format!("manifest build ({to_env})"));
            labels.push(format!("sync ({to_env})"));
            labels.push(format!("deploy ({to_env})"));
        }
        labels.push("postflight".to_string());
        labels
    }

    fn execute(
        &self,
        fingerprint: &ChangeFingerprint,
        recorder: &mut StageRecorder,
        promotions: &mut Vec<PromotionStep>,
    ) -> Result<(), ValidateError> {
        // The cutoff for promotion-MR matching: anything created before
        // the run began belongs to an earlier run.
        let cascade_since = Utc::now();
        let first = self.config.chain[0].clone();
        let settings = self.config.env_settings(&first);

        recorder.run_stage("preflight", || {
            let detail = self.preflight()?;
            Ok(((), detail))
        })?;

        // The application build is triggered externally (commit/push); the
        // baseline captured here anchors "the build we are waiting for".
        recorder.run_stage(&format!("build ({first})"), || {
            let baseline = capture_build_baseline(self.ctx.ci.as_ref(), &settings.app_job)?;
            let waiter = BuildWaiter::new(
                self.ctx.ci.as_ref(),
                self.config.build_waiter(),
                self.cancel.clone(),
            );
            let completed = waiter.await_build(&settings.app_job, &baseline)?;
            let detail = format!("build #{} succeeded", completed.number);
            Ok((completed, detail))
        })?;

        // Downstream baselines must precede the merge that triggers them.
        let (manifest_baseline, sync_baseline) = recorder.run_stage(
            &format!("merge request ({first})"),
            || {
                let manifest_baseline =
                    capture_build_baseline(self.ctx.ci.as_ref(), &settings.manifest_job)?;
                let sync_baseline =
                    capture_sync_baseline(self.ctx.gitops.as_ref(), &settings.app)?;

                let resolver = MergeRequestResolver::new(
                    self.ctx.forge.as_ref(),
                    self.config.resolver(),
                    self.cancel.clone(),
                );
                let found = resolver.find(
                    &self.config.forge.project,
                    &self.config.forge.target_branch,
                    &fingerprint.update_branch_prefix(&first),
                    None,
                )?;
                let merged = resolver.merge(&found)?;
                let detail = format!("merged !{} ({})", merged.iid, merged.source_branch);
                Ok(((manifest_baseline, sync_baseline), detail))
            },
        )?;

        recorder.run_stage(&format!("manifest build ({first})"), || {
            let waiter = BuildWaiter::new(
                self.ctx.ci.as_ref(),
                self.config.build_waiter(),
                self.cancel.clone(),
            );
            let completed = waiter.await_build(&settings.manifest_job, &manifest_baseline)?;
            let detail = format!("build #{} succeeded", completed.number);
            Ok((completed, detail))
        })?;

        recorder.run_stage(&format!("sync ({first})"), || {
            let waiter = SyncWaiter::new(
                self.ctx.gitops.as_ref(),
                self.config.sync_waiter(),
                self.cancel.clone(),
            );
            let state = waiter.wait_for_sync(&settings.app, &sync_baseline)?;
            let detail = format!("synced at revision {}", state.revision);
            Ok((state, detail))
        })?;

        recorder.run_stage(&format!("deploy ({first})"), || {
            let verifier = DeploymentVerifier::new(
                self.ctx.workload.as_ref(),
                self.config.verifier(),
                self.cancel.clone(),
            );
            let record = verifier.verify(
                &settings.namespace,
                &settings.selector,
                &fingerprint.image_tag_fragment(),
            )?;
            let detail = format!("{} running {}", record.pod, record.image);
            Ok((record, detail))
        })?;

        let cascade = PromotionCascade::new(
            &self.ctx,
            &self.config,
            self.cancel.clone(),
            cascade_since,
        );
        *promotions = cascade.run(fingerprint, recorder)?;

        recorder.run_stage("postflight", || {
            let detail = self.postflight(fingerprint);
            Ok(((), detail))
        })?;

        Ok(())
    }

    /// Read-only reachability and authentication probe of all four
    /// systems, before any mutating action. Also exposed as its own CLI
    /// command.
    ///
    /// # Errors
    ///
    /// Returns `PreflightFailed` naming the first unreachable or
    /// unauthenticated system.
    pub fn preflight(&self) -> Result<String, ValidateError> {
        let probes: [(&str, Result<(), ValidateError>); 4] = [
            ("ci", self.ctx.ci.ping()),
            ("forge", self.ctx.forge.ping()),
            ("gitops", self.ctx.gitops.ping()),
            ("workload", self.ctx.workload.ping()),
        ];
        for (system, probe) in probes {
            probe.map_err(|error| ValidateError::PreflightFailed {
                system: system.to_string(),
                reason: error.to_string(),
            })?;
        }
        Ok("all four systems reachable and authenticated".to_string())
    }

    /// Read-only residue check after success: open MRs matching this
    /// run's prefixes, or still-queued builds, indicate something this run
    /// (or its downstream pipelines) left behind. Residues and probe
    /// failures are reported, never fatal.
    fn postflight(&self, fingerprint: &ChangeFingerprint) -> String {
        let mut residues = Vec::new();

        match self.ctx.forge.open_merge_requests(
            &self.config.forge.project,
            &self.config.forge.target_branch,
        ) {
            Ok(open) => {
                for env in &self.config.chain {
                    let update_prefix = fingerprint.update_branch_prefix(env);
                    let promote_prefix = promote_branch_prefix(env);
                    for mr in &open {
                        if mr.source_branch.starts_with(&update_prefix)
                            || mr.source_branch.starts_with(&promote_prefix)
                        {
                            residues.push(format!("open MR !{} ({})", mr.iid, mr.source_branch));
                        }
                    }
                }
            },
            Err(error) => {
                warn!(%error, "postflight MR residue probe failed");
                residues.push(format!("MR residue probe unavailable: {error}"));
            },
        }

        for env in &self.config.chain {
            let settings = self.config.env_settings(env);
            for job in [&settings.app_job, &settings.manifest_job] {
                match self.ctx.ci.has_queued_builds(job) {
                    Ok(true) => residues.push(format!("queued build on {job}")),
                    Ok(false) => {},
                    Err(error) => {
                        warn!(%error, job = %job, "postflight queue probe failed");
                    },
                }
            }
        }

        if residues.is_empty() {
            "no residual MRs or queued builds".to_string()
        } else {
            for residue in &residues {
                warn!(residue = residue.as_str(), "postflight residue");
            }
            format!("residues: {}", residues.join("; "))
        }
    }
}
