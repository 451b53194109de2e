//! The Repository capability: every version-control operation the sync
//! pipeline needs, behind one trait.
//!
//! [`Git2Repository`] is the production implementation; `mock::MockRepository`
//! records calls for the orchestrator tests.

pub mod client;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod remote_url;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::RepositoryError;
use crate::files::Matcher;

pub use client::Git2Repository;

/// A named git remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A reference advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Full ref name, e.g. `refs/heads/main`.
    pub name: String,
    pub oid: String,
}

impl RemoteRef {
    pub fn new(name: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            oid: oid.into(),
        }
    }

    /// Short branch name when this is a `refs/heads/` ref.
    pub fn branch_name(&self) -> Option<&str> {
        self.name.strip_prefix("refs/heads/")
    }
}

/// Full ref name of a local branch.
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// Full ref name (or ref glob) of a tag.
pub fn tag_ref(tag: &str) -> String {
    format!("refs/tags/{}", tag)
}

/// How a merge ended when it did not conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge: the branch already contains the other side.
    UpToDate,
    /// Changes were merged (fast-forward or merge commit).
    Merged,
}

/// Result of staging and committing the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitInfo),
    /// The working tree matched HEAD; no commit was created.
    NothingToCommit,
}

/// A freshly created commit and its diff statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub summary: String,
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl fmt::Display for CommitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.sha.get(..8).unwrap_or(&self.sha);
        write!(
            f,
            "{} {} ({} files changed, {} insertions(+), {} deletions(-))",
            short, self.summary, self.files_changed, self.insertions, self.deletions
        )
    }
}

/// Version-control operations against a single working tree.
///
/// All calls are blocking and operate on shared working-tree state (current
/// branch, index); callers must not interleave operations from several
/// threads.
pub trait Repository {
    /// Fetch all branches and tags of `remote`, creating or re-pointing the
    /// remote to its URL first.
    fn fetch(&self, remote: &Remote) -> Result<(), RepositoryError>;

    /// Make `new_branch` point at `remote`'s `branch` and check it out,
    /// discarding local modifications to tracked files.
    fn checkout_as(&self, remote: &Remote, branch: &str, new_branch: &str) -> Result<(), RepositoryError>;

    /// Write the files of `remote`'s `branch` selected by `matcher` over the
    /// working tree, without moving HEAD.
    fn checkout_onto_workspace(
        &self,
        remote: &Remote,
        branch: &str,
        matcher: &Matcher,
    ) -> Result<(), RepositoryError>;

    /// Merge `remote`'s `branch` into the current branch. A conflicting merge
    /// is an error ([`RepositoryError::MergeConflict`]).
    fn merge(&self, remote: &Remote, branch: &str) -> Result<MergeOutcome, RepositoryError>;

    /// Stage every change in the working tree and commit it.
    fn commit_changes(&self, message: &str) -> Result<CommitOutcome, RepositoryError>;

    /// Push a full ref name, or a ref glob such as `refs/tags/v*`.
    fn push(&self, remote: &Remote, ref_name: &str) -> Result<(), RepositoryError>;

    /// Delete a local branch. It must not be checked out.
    fn delete_branch(&self, name: &str) -> Result<(), RepositoryError>;

    /// List the refs advertised by `remote`.
    fn list_remote(&self, remote: &Remote) -> Result<Vec<RemoteRef>, RepositoryError>;

    /// Apply a patch file to the working tree.
    fn apply_patch(&self, patch: &Path) -> Result<(), RepositoryError>;
}

/// A branch of a remote, about to be checked out one way or another.
pub struct Checkout<'r> {
    repo: &'r dyn Repository,
    remote: &'r Remote,
    branch: &'r str,
}

impl<'r> Checkout<'r> {
    pub fn new(repo: &'r dyn Repository, remote: &'r Remote, branch: &'r str) -> Self {
        Self { repo, remote, branch }
    }

    /// Check the branch out as local branch `new_branch`.
    pub fn as_branch(self, new_branch: &str) -> Result<(), RepositoryError> {
        self.repo.checkout_as(self.remote, self.branch, new_branch)
    }

    /// Lay the selected files of the branch over the current working tree.
    pub fn onto_workspace(self, matcher: &Matcher) -> Result<(), RepositoryError> {
        self.repo
            .checkout_onto_workspace(self.remote, self.branch, matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name() {
        assert_eq!(
            RemoteRef::new("refs/heads/release-1.2", "abc").branch_name(),
            Some("release-1.2")
        );
        assert_eq!(RemoteRef::new("refs/tags/v1.2.0", "abc").branch_name(), None);
        assert_eq!(RemoteRef::new("HEAD", "abc").branch_name(), None);
    }

    #[test]
    fn test_ref_helpers() {
        assert_eq!(branch_ref("release-next"), "refs/heads/release-next");
        assert_eq!(tag_ref("v*"), "refs/tags/v*");
    }

    #[test]
    fn test_commit_info_display() {
        let info = CommitInfo {
            sha: "0123456789abcdef".into(),
            summary: "Apply fork specific files".into(),
            files_changed: 3,
            insertions: 10,
            deletions: 2,
        };
        assert_eq!(
            info.to_string(),
            "01234567 Apply fork specific files (3 files changed, 10 insertions(+), 2 deletions(-))"
        );
    }
}
