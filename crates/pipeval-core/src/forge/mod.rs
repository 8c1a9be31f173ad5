//! Merge-request host integration.
//!
//! Update and promotion merge requests are created by other actors (a
//! bump pipeline, a downstream manifest pipeline); this engine only finds
//! them by their deterministic source-branch naming and merges them once
//! mergeable. Multiple unrelated MRs may be open at any time, so candidate
//! selection is a pure, deterministic function over the open-MR list.

mod gitlab;
mod resolver;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
pub use gitlab::GitLabClient;
pub use resolver::{MergeRequestResolver, ResolverConfig};
use serde::{Deserialize, Serialize};

use crate::error::ValidateError;

/// Mergeability as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStatus {
    /// The host has verified the MR merges cleanly.
    CanBeMerged,
    /// The host has verified the MR cannot merge.
    CannotBeMerged,
    /// Mergeability has not been computed yet.
    Unchecked,
    /// The host is computing mergeability right now.
    Checking,
    /// Any other status string.
    Other(String),
}

impl MergeStatus {
    /// Parses the host's status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "can_be_merged" => Self::CanBeMerged,
            "cannot_be_merged" => Self::CannotBeMerged,
            "unchecked" => Self::Unchecked,
            "checking" => Self::Checking,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CanBeMerged => f.write_str("can_be_merged"),
            Self::CannotBeMerged => f.write_str("cannot_be_merged"),
            Self::Unchecked => f.write_str("unchecked"),
            Self::Checking => f.write_str("checking"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// An open merge request as observed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Project the MR belongs to.
    pub project: String,
    /// Project-scoped MR number.
    pub iid: u64,
    /// Branch the MR merges from.
    pub source_branch: String,
    /// Branch the MR merges into.
    pub target_branch: String,
    /// Creation time on the host.
    pub created_at: DateTime<Utc>,
    /// Whether the host reports merge conflicts.
    pub has_conflicts: bool,
    /// Mergeability status.
    pub merge_status: MergeStatus,
}

/// Read-mostly client for the merge-request host. The single write
/// operation is [`ForgeClient::merge`].
pub trait ForgeClient: Send + Sync {
    /// Open merge requests in `project` targeting `target_branch`.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or the response cannot be
    /// decoded.
    fn open_merge_requests(
        &self,
        project: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, ValidateError>;

    /// Merges the MR. This is the engine's only mutating call; it advances
    /// the target branch and thereby triggers the downstream pipeline.
    ///
    /// # Errors
    ///
    /// - `HasConflicts` when the host refuses because of conflicts.
    /// - `NotMergeableYet` when the host has not finished computing
    ///   mergeability.
    /// - `Http` for other failures.
    fn merge(&self, project: &str, iid: u64) -> Result<MergeRequest, ValidateError>;

    /// Read-only reachability and authentication probe.
    ///
    /// # Errors
    ///
    /// Returns an error when the host is unreachable or rejects the
    /// credentials.
    fn ping(&self) -> Result<(), ValidateError>;
}

/// Selects the merge request to act on from an open-MR listing.
///
/// The rule, applied uniformly at every call site: keep MRs whose source
/// branch starts with `prefix` (and, when `since` is given, created at or
/// after it), then take the oldest by `created_at`, breaking exact ties by
/// ascending `iid`. Repeated calls over the same candidate set always
/// return the same MR.
#[must_use]
pub fn select_candidate<'a>(
    open: &'a [MergeRequest],
    prefix: &str,
    since: Option<DateTime<Utc>>,
) -> Option<&'a MergeRequest> {
    open.iter()
        .filter(|mr| mr.source_branch.starts_with(prefix))
        .filter(|mr| since.map_or(true, |cutoff| mr.created_at >= cutoff))
        .min_by_key(|mr| (mr.created_at, mr.iid))
}

/// Scripted forge client for tests.
///
/// Each [`ForgeClient::open_merge_requests`] call consumes the next
/// scripted listing; the final listing repeats once the script is
/// exhausted. [`ForgeClient::merge`] consults the current listing and
/// records the merged iid.
#[derive(Debug, Default)]
pub struct MockForgeClient {
    listings: Mutex<VecDeque<Vec<MergeRequest>>>,
    merged: Mutex<Vec<u64>>,
}

impl MockForgeClient {
    /// A client that replays `listings` in order.
    #[must_use]
    pub fn scripted(listings: Vec<Vec<MergeRequest>>) -> Self {
        Self {
            listings: Mutex::new(listings.into()),
            merged: Mutex::new(Vec::new()),
        }
    }

    /// Iids merged so far, in merge order.
    #[must_use]
    pub fn merged(&self) -> Vec<u64> {
        self.merged.lock().expect("mock merged lock poisoned").clone()
    }

    fn current_listing(&self) -> Vec<MergeRequest> {
        let mut listings = self.listings.lock().expect("mock listing lock poisoned");
        if listings.len() > 1 {
            listings.pop_front().unwrap_or_default()
        } else {
            listings.front().cloned().unwrap_or_default()
        }
    }
}

impl ForgeClient for MockForgeClient {
    fn open_merge_requests(
        &self,
        _project: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, ValidateError> {
        Ok(self
            .current_listing()
            .into_iter()
            .filter(|mr| mr.target_branch == target_branch)
            .collect())
    }

    fn merge(&self, project: &str, iid: u64) -> Result<MergeRequest, ValidateError> {
        let listing = self.current_listing();
        let mr = listing
            .into_iter()
            .find(|mr| mr.iid == iid)
            .ok_or_else(|| ValidateError::Http {
                system: "forge".to_string(),
                status: Some(404),
                message: format!("merge request !{iid} not found"),
            })?;

        if mr.has_conflicts {
            return Err(ValidateError::HasConflicts {
                project: project.to_string(),
                iid,
                source_branch: mr.source_branch,
            });
        }
        if mr.merge_status != MergeStatus::CanBeMerged {
            return Err(ValidateError::NotMergeableYet {
                project: project.to_string(),
                iid,
                status: mr.merge_status.to_string(),
            });
        }

        self.merged.lock().expect("mock merged lock poisoned").push(iid);
        Ok(mr)
    }

    fn ping(&self) -> Result<(), ValidateError> {
        Ok(())
    }
}
