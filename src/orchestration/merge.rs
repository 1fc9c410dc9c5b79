//! Result merger: integrates successful worker branches.
//!
//! When auto-merge is enabled, each successfully completed subtask's branch
//! is merged into the configured integration branch. A conflict never
//! changes the subtask's Completed status; it is surfaced as a warning for
//! manual resolution.

use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::{hlog_debug, hlog_warn};

/// Outcome of a merge attempt, value-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Branch merged; carries the resulting integration commit id.
    Merged(String),
    /// Merge not attempted; carries the reason.
    Skipped(String),
    /// Merge aborted on a content conflict; branches untouched.
    Conflict(String),
}

impl MergeOutcome {
    /// The warning text to attach to a task result, if any.
    pub fn warning(&self) -> Option<String> {
        match self {
            MergeOutcome::Merged(_) => None,
            MergeOutcome::Skipped(reason) => Some(format!("merge skipped: {}", reason)),
            MergeOutcome::Conflict(message) => Some(format!("merge conflict: {}", message)),
        }
    }
}

/// Merges completed subtask branches into the integration branch.
pub struct ResultMerger {
    git: GitOps,
    target: String,
    require_tests_pass: bool,
}

impl ResultMerger {
    pub fn new(git: GitOps, target: &str, require_tests_pass: bool) -> Self {
        Self {
            git,
            target: target.to_string(),
            require_tests_pass,
        }
    }

    /// The integration branch merges land on.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Attempt to merge a worker branch.
    ///
    /// `tests_passed` is the worker's test signal; when the merger was
    /// configured with `require_tests_pass`, an unconfirmed test run skips
    /// the merge. Conflicts are reported as a value, not an error; only
    /// unexpected git failures propagate as `Err`.
    pub fn merge(&self, branch: &str, tests_passed: bool) -> Result<MergeOutcome> {
        if self.require_tests_pass && !tests_passed {
            hlog_debug!("Skipping merge of {}: tests not confirmed", branch);
            return Ok(MergeOutcome::Skipped(
                "tests not confirmed passing".to_string(),
            ));
        }

        match self.git.merge_branch(branch, &self.target) {
            Ok(commit) => {
                hlog_debug!("Merged {} into {} at {}", branch, self.target, commit);
                Ok(MergeOutcome::Merged(commit))
            }
            Err(Error::MergeConflict { branch, target }) => {
                hlog_warn!("Merge conflict: {} into {}", branch, target);
                Ok(MergeOutcome::Conflict(format!(
                    "'{}' conflicts with '{}'",
                    branch, target
                )))
            }
            Err(e) => Err(e),
        }
    }
}
