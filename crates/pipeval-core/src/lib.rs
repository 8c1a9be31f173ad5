//! pipeval-core - Pipeline promotion validation engine.
//!
//! Validates that a code change propagates correctly through a multi-stage
//! deployment pipeline spanning four independently-operated services: a
//! CI build system, a merge-request host, a GitOps sync controller, and a
//! container orchestrator. The engine observes and drives these systems
//! through their public APIs only; it never implements them, never
//! rolls back, and treats triggering as at-least-once with idempotent
//! detection.
//!
//! # Architecture
//!
//! ```text
//! PipelineValidator (orchestrator)
//!     |
//!     +-- preflight / postflight      read-only system probes
//!     +-- BuildWaiter                 CI build lifecycle, baseline-anchored
//!     +-- MergeRequestResolver        deterministic MR matching + merge
//!     +-- SyncWaiter                  GitOps sync, revision must advance
//!     +-- DeploymentVerifier          running pods carry the expected tag
//!     +-- PromotionCascade            the above, repeated per environment
//! ```
//!
//! Every waiter is anchored to a [`baseline::Baseline`] captured before
//! the action it waits on, so stale state from earlier runs never
//! satisfies a wait. All polling goes through one bounded primitive
//! ([`poll::poll_until`]) with an independent budget per phase and
//! cooperative cancellation.

pub mod baseline;
pub mod cancel;
pub mod cascade;
pub mod ci;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod forge;
pub mod gitops;
pub mod poll;
pub mod report;
pub mod validator;
pub mod workload;

pub use baseline::{Baseline, BaselineSystem};
pub use cancel::CancelToken;
pub use cascade::{PromotionCascade, PromotionStep};
pub use config::{ConfigError, ValidatorConfig};
pub use error::ValidateError;
pub use fingerprint::ChangeFingerprint;
pub use report::{RunSummary, StageOutcome, StageReport};
pub use validator::{PipelineValidator, RunOutcome, ValidatorContext};
