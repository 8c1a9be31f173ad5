//! Baseline capture.
//!
//! A baseline snapshots a monotonically-increasing marker from an external
//! system *before* the action that is expected to change it, so that later
//! polling can require a genuinely new occurrence instead of accepting
//! stale state left over from a prior run. Baselines are captured once,
//! compared, and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which external marker a baseline snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSystem {
    /// CI build number of a job.
    Build,
    /// GitOps sync revision of an application.
    SyncRevision,
    /// Wall-clock timestamp (promotion-MR creation window).
    Timestamp,
}

/// A captured marker value.
///
/// Absence of the subject is a valid starting state: a job that never ran
/// baselines at build number 0, an application without a synced revision
/// baselines at the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Marker kind.
    pub system: BaselineSystem,
    /// Job path, application name, or other subject identifier.
    pub subject: String,
    /// Marker value at capture time.
    pub value: String,
}

impl Baseline {
    /// Baseline on a CI job's last build number.
    #[must_use]
    pub fn build(job: impl Into<String>, number: u64) -> Self {
        Self {
            system: BaselineSystem::Build,
            subject: job.into(),
            value: number.to_string(),
        }
    }

    /// Baseline on a GitOps application's sync revision.
    #[must_use]
    pub fn sync_revision(app: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            system: BaselineSystem::SyncRevision,
            subject: app.into(),
            value: revision.into(),
        }
    }

    /// Baseline on the current wall clock.
    #[must_use]
    pub fn timestamp_now(subject: impl Into<String>) -> Self {
        Self::timestamp_at(subject, Utc::now())
    }

    /// Baseline on an explicit instant.
    #[must_use]
    pub fn timestamp_at(subject: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            system: BaselineSystem::Timestamp,
            subject: subject.into(),
            value: at.to_rfc3339(),
        }
    }

    /// The captured build number. 0 when the baseline is not a build
    /// baseline or the value does not parse.
    #[must_use]
    pub fn build_number(&self) -> u64 {
        match self.system {
            BaselineSystem::Build => self.value.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// The captured revision. Empty for non-revision baselines.
    #[must_use]
    pub fn revision(&self) -> &str {
        match self.system {
            BaselineSystem::SyncRevision => &self.value,
            _ => "",
        }
    }

    /// The captured instant, when this is a timestamp baseline.
    #[must_use]
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self.system {
            BaselineSystem::Timestamp => DateTime::parse_from_rfc3339(&self.value)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_baseline_round_trips_number() {
        let baseline = Baseline::build("deploy/app/main", 5);
        assert_eq!(baseline.build_number(), 5);
        assert_eq!(baseline.revision(), "");
    }

    #[test]
    fn absent_subject_is_zero_value() {
        let baseline = Baseline::build("never-ran", 0);
        assert_eq!(baseline.build_number(), 0);

        let baseline = Baseline::sync_revision("new-app", "");
        assert_eq!(baseline.revision(), "");
    }

    #[test]
    fn timestamp_baseline_round_trips_instant() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let baseline = Baseline::timestamp_at("cascade-stage", at);
        assert_eq!(baseline.instant(), Some(at));
    }

    #[test]
    fn accessors_are_zero_for_mismatched_kind() {
        let baseline = Baseline::sync_revision("app", "r1");
        assert_eq!(baseline.build_number(), 0);
        assert!(baseline.instant().is_none());
    }
}
