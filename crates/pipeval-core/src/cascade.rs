//! Promotion cascade across environments.
//!
//! After a change lands in the first environment, a downstream pipeline
//! opens a promotion MR toward the next one. Each hop repeats the same
//! shape: capture baselines, merge the promotion MR, wait for the manifest
//! build, wait for sync, verify the deployment. The artifact identity (the
//! change fingerprint) is carried forward unchanged; only the environment
//! advances.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::baseline::Baseline;
use crate::cancel::CancelToken;
use crate::ci::{BuildWaiter, capture_build_baseline};
use crate::config::ValidatorConfig;
use crate::error::ValidateError;
use crate::fingerprint::{ChangeFingerprint, promote_branch_prefix};
use crate::forge::{MergeRequest, MergeRequestResolver};
use crate::gitops::{SyncWaiter, capture_sync_baseline};
use crate::report::{StageOutcome, StageRecorder};
use crate::validator::ValidatorContext;
use crate::workload::DeploymentVerifier;

/// One completed (or skipped) promotion hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionStep {
    /// Environment the change was promoted from.
    pub from_env: String,
    /// Environment the change was promoted into.
    pub to_env: String,
    /// The merged promotion MR; `None` when the hop was soft-skipped
    /// because no promotion MR appeared.
    pub mr: Option<MergeRequest>,
}

/// Drives promotion hops in chain order.
pub struct PromotionCascade<'a> {
    ctx: &'a ValidatorContext,
    config: &'a ValidatorConfig,
    cancel: CancelToken,
    /// Promotion MRs must have been created after this instant; stale MRs
    /// from earlier, unrelated runs never match.
    since: DateTime<Utc>,
}

impl<'a> PromotionCascade<'a> {
    /// Creates a cascade runner.
    #[must_use]
    pub const fn new(
        ctx: &'a ValidatorContext,
        config: &'a ValidatorConfig,
        cancel: CancelToken,
        since: DateTime<Utc>,
    ) -> Self {
        Self {
            ctx,
            config,
            cancel,
            since,
        }
    }

    /// Runs every hop in the chain, recording stages into `recorder`.
    ///
    /// A missing promotion MR is fatal unless `promotion.mandatory` is
    /// off, in which case the hop is recorded as skipped and the cascade
    /// stops without failing the run.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error from any hop stage.
    pub fn run(
        &self,
        fingerprint: &ChangeFingerprint,
        recorder: &mut StageRecorder,
    ) -> Result<Vec<PromotionStep>, ValidateError> {
        let mut steps = Vec::new();

        for pair in self.config.chain.windows(2) {
            let (from_env, to_env) = (&pair[0], &pair[1]);
            info!(from_env, to_env, "starting promotion hop");

            match self.merge_promotion_mr(to_env, recorder)? {
                Some((mr, manifest_baseline, sync_baseline)) => {
                    self.validate_target_env(
                        to_env,
                        fingerprint,
                        &manifest_baseline,
                        &sync_baseline,
                        recorder,
                    )?;
                    steps.push(PromotionStep {
                        from_env: from_env.clone(),
                        to_env: to_env.clone(),
                        mr: Some(mr),
                    });
                },
                None => {
                    steps.push(PromotionStep {
                        from_env: from_env.clone(),
                        to_env: to_env.clone(),
                        mr: None,
                    });
                    break;
                },
            }
        }

        Ok(steps)
    }

    /// Captures the hop's baselines, then finds and merges the promotion
    /// MR. Returns `None` when the MR is absent and absence is tolerated.
    fn merge_promotion_mr(
        &self,
        to_env: &str,
        recorder: &mut StageRecorder,
    ) -> Result<Option<(MergeRequest, Baseline, Baseline)>, ValidateError> {
        let label = format!("promotion ({to_env})");
        let settings = self.config.env_settings(to_env);
        let prefix = promote_branch_prefix(to_env);
        let started = Instant::now();

        let attempt: Result<(MergeRequest, Baseline, Baseline), ValidateError> = (|| {
            // Baselines precede the merge, which is the trigger for both
            // the manifest build and the sync.
            let manifest_baseline =
                capture_build_baseline(self.ctx.ci.as_ref(), &settings.manifest_job)?;
            let sync_baseline =
                capture_sync_baseline(self.ctx.gitops.as_ref(), &settings.app)?;

            let resolver = MergeRequestResolver::new(
                self.ctx.forge.as_ref(),
                self.config.promotion_resolver(),
                self.cancel.clone(),
            );
            let found = resolver
                .find(
                    &self.config.forge.project,
                    &self.config.forge.target_branch,
                    &prefix,
                    Some(self.since),
                )
                .map_err(|error| match error {
                    // Promotion absence has its own taxonomy entry so the
                    // mandatory/soft policy can match on it.
                    ValidateError::MergeRequestNotFound { .. } => {
                        ValidateError::PromotionMrNotFound {
                            env: to_env.to_string(),
                            prefix: prefix.clone(),
                            waited: started.elapsed(),
                        }
                    },
                    other => other,
                })?;
            let merged = resolver.merge(&found)?;
            Ok((merged, manifest_baseline, sync_baseline))
        })();

        match attempt {
            Ok((mr, manifest_baseline, sync_baseline)) => {
                recorder.record(
                    &label,
                    StageOutcome::Passed,
                    started.elapsed(),
                    format!("merged !{} ({})", mr.iid, mr.source_branch),
                );
                Ok(Some((mr, manifest_baseline, sync_baseline)))
            },
            Err(error @ ValidateError::PromotionMrNotFound { .. })
                if !self.config.promotion.mandatory =>
            {
                warn!(to_env, %error, "promotion MR absent, skipping hop by policy");
                recorder.record(
                    &label,
                    StageOutcome::Skipped,
                    started.elapsed(),
                    error.to_string(),
                );
                Ok(None)
            },
            Err(error) => {
                recorder.record(
                    &label,
                    StageOutcome::Failed,
                    started.elapsed(),
                    error.to_string(),
                );
                Err(error)
            },
        }
    }

    /// Manifest build, sync, and deployment verification in the target
    /// environment.
    fn validate_target_env(
        &self,
        to_env: &str,
        fingerprint: &ChangeFingerprint,
        manifest_baseline: &Baseline,
        sync_baseline: &Baseline,
        recorder: &mut StageRecorder,
    ) -> Result<(), ValidateError> {
        let settings = self.config.env_settings(to_env);

        recorder.run_stage(&format!("manifest build ({to_env})"), || {
            let waiter = BuildWaiter::new(
                self.ctx.ci.as_ref(),
                self.config.build_waiter(),
                self.cancel.clone(),
            );
            let completed = waiter.await_build(&settings.manifest_job, manifest_baseline)?;
            let detail = format!("build #{} succeeded", completed.number);
            Ok((completed, detail))
        })?;

        recorder.run_stage(&format!("sync ({to_env})"), || {
            let waiter = SyncWaiter::new(
                self.ctx.gitops.as_ref(),
                self.config.sync_waiter(),
                self.cancel.clone(),
            );
            let state = waiter.wait_for_sync(&settings.app, sync_baseline)?;
            let detail = format!("synced at revision {}", state.revision);
            Ok((state, detail))
        })?;

        recorder.run_stage(&format!("deploy ({to_env})"), || {
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

        Ok(())
    }
}
