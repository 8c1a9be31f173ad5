//! Change fingerprint and branch-name derivation.
//!
//! A fingerprint is derived once at the start of a run and is immutable for
//! the run's lifetime. Every branch prefix and image tag the engine matches
//! against is derived from it by a pure function, so the matching rules are
//! unit-testable without any HTTP client.

use serde::{Deserialize, Serialize};

use crate::error::ValidateError;

/// Length a commit hash is shortened to for branch names and image tags.
pub const SHORT_COMMIT_LEN: usize = 7;

/// Deterministic identity of the change under validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFingerprint {
    /// Semantic version of the change (e.g. `1.2.3`).
    pub version: String,
    /// Short commit hash (7 hex characters).
    pub commit: String,
}

impl ChangeFingerprint {
    /// Creates a fingerprint, shortening `commit` to its 7-character form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when either field is empty, or when the
    /// commit is shorter than [`SHORT_COMMIT_LEN`] or not lowercase hex.
    pub fn new(
        version: impl Into<String>,
        commit: impl Into<String>,
    ) -> Result<Self, ValidateError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(ValidateError::InvalidInput {
                field: "version".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let commit = commit.into();
        if commit.len() < SHORT_COMMIT_LEN {
            return Err(ValidateError::InvalidInput {
                field: "commit".to_string(),
                reason: format!("must be at least {SHORT_COMMIT_LEN} characters"),
            });
        }
        if !commit.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(ValidateError::InvalidInput {
                field: "commit".to_string(),
                reason: "must be lowercase hex".to_string(),
            });
        }

        Ok(Self {
            version,
            commit: commit[..SHORT_COMMIT_LEN].to_string(),
        })
    }

    /// Source-branch prefix of the update MR for `env`:
    /// `update-<env>-<version>-<commit>`.
    ///
    /// The full fingerprint narrows the match to exactly this change, so
    /// unrelated open update MRs (older versions, other commits) never
    /// collide with it.
    #[must_use]
    pub fn update_branch_prefix(&self, env: &str) -> String {
        format!("update-{env}-{}-{}", self.version, self.commit)
    }

    /// Fragment the deployed image reference must contain:
    /// `<version>-<commit>`.
    #[must_use]
    pub fn image_tag_fragment(&self) -> String {
        format!("{}-{}", self.version, self.commit)
    }
}

/// Source-branch prefix of the auto-created promotion MR toward `env`:
/// `promote-<env>-`.
///
/// Promotion branches carry a pipeline-chosen timestamp suffix, so the
/// prefix alone cannot identify a run; callers additionally bound the
/// match by MR creation time.
#[must_use]
pub fn promote_branch_prefix(env: &str) -> String {
    format!("promote-{env}-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_commit_to_seven_chars() {
        let fp = ChangeFingerprint::new("1.2.3", "abcd1234567890").unwrap();
        assert_eq!(fp.commit, "abcd123");
    }

    #[test]
    fn rejects_empty_version() {
        assert!(matches!(
            ChangeFingerprint::new("  ", "abcd123"),
            Err(ValidateError::InvalidInput { field, .. }) if field == "version"
        ));
    }

    #[test]
    fn rejects_short_or_non_hex_commit() {
        assert!(ChangeFingerprint::new("1.0.0", "abc").is_err());
        assert!(ChangeFingerprint::new("1.0.0", "ABCD123").is_err());
        assert!(ChangeFingerprint::new("1.0.0", "zzzzzzz").is_err());
    }

    #[test]
    fn derives_update_prefix_and_tag_fragment() {
        let fp = ChangeFingerprint::new("1.2.3", "abcd123").unwrap();
        assert_eq!(fp.update_branch_prefix("dev"), "update-dev-1.2.3-abcd123");
        assert_eq!(fp.image_tag_fragment(), "1.2.3-abcd123");
    }

    #[test]
    fn promote_prefix_is_env_scoped() {
        assert_eq!(promote_branch_prefix("stage"), "promote-stage-");
    }
}
