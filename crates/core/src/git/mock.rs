//! Mock repository for deterministic orchestrator tests.
//!
//! Records every call, tracks which local branch is checked out, and can be
//! told to fail specific operations. Clones share state, so a test can hand a
//! boxed clone to the pipeline and inspect the original afterwards.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{branch_ref, CommitInfo, CommitOutcome, MergeOutcome, Remote, RemoteRef, Repository};
use crate::errors::RepositoryError;
use crate::files::Matcher;

/// Mock repository.
#[derive(Debug, Clone, Default)]
pub struct MockRepository {
    inner: Arc<Mutex<MockRepositoryInner>>,
}

#[derive(Debug, Default)]
struct MockRepositoryInner {
    /// Refs advertised per remote name.
    remote_refs: HashMap<String, Vec<RemoteRef>>,
    /// Merge outcome per branch; branches not listed are up to date.
    merges: HashMap<String, MergeOutcome>,
    nothing_to_commit: bool,
    failures: Vec<(OpKind, Option<String>)>,
    operations: Vec<RepoOperation>,
    branches: BTreeSet<String>,
    current: Option<String>,
    commits: usize,
}

/// Kind of repository operation, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Fetch,
    CheckoutAs,
    CheckoutOntoWorkspace,
    Merge,
    Commit,
    Push,
    DeleteBranch,
    ListRemote,
    ApplyPatch,
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoOperation {
    Fetch { remote: String },
    CheckoutAs { remote: String, branch: String, new_branch: String },
    CheckoutOntoWorkspace { remote: String, branch: String },
    Merge { remote: String, branch: String },
    Commit { message: String },
    Push { remote: String, ref_name: String },
    DeleteBranch { name: String },
    ListRemote { remote: String },
    ApplyPatch { file: String },
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise `refs/heads/<branch>` for each branch on `remote`.
    pub fn with_branches(self, remote: &str, branches: &[&str]) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let refs = inner.remote_refs.entry(remote.to_string()).or_default();
            for (idx, branch) in branches.iter().enumerate() {
                refs.push(RemoteRef::new(branch_ref(branch), format!("{:040x}", idx + 1)));
            }
        }
        self
    }

    /// Merging `branch` reports `outcome`.
    pub fn with_merge(self, branch: &str, outcome: MergeOutcome) -> Self {
        self.inner
            .lock()
            .unwrap()
            .merges
            .insert(branch.to_string(), outcome);
        self
    }

    /// Every commit reports a clean working tree.
    pub fn with_nothing_to_commit(self) -> Self {
        self.inner.lock().unwrap().nothing_to_commit = true;
        self
    }

    /// Fail every `kind` operation.
    pub fn fail_on_any(self, kind: OpKind) -> Self {
        self.inner.lock().unwrap().failures.push((kind, None));
        self
    }

    /// Fail `kind` operations whose subject (branch, ref, remote, message or
    /// patch file name) equals `target`.
    pub fn fail_on(self, kind: OpKind, target: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push((kind, Some(target.to_string())));
        self
    }

    pub fn operations(&self) -> Vec<RepoOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    /// Ref names pushed, in order.
    pub fn pushes(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                RepoOperation::Push { ref_name, .. } => Some(ref_name),
                _ => None,
            })
            .collect()
    }

    /// Commit messages, in order, including no-op commits.
    pub fn commit_messages(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                RepoOperation::Commit { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn current_branch(&self) -> Option<String> {
        self.inner.lock().unwrap().current.clone()
    }

    /// Local branches that currently exist.
    pub fn local_branches(&self) -> Vec<String> {
        self.inner.lock().unwrap().branches.iter().cloned().collect()
    }

    fn record(&self, op: RepoOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    fn check_fail(&self, kind: OpKind, subject: &str) -> Result<(), RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let hit = inner
            .failures
            .iter()
            .any(|(k, target)| *k == kind && target.as_deref().map_or(true, |t| t == subject));
        if !hit {
            return Ok(());
        }
        Err(match kind {
            OpKind::Push => RepositoryError::PushRejected {
                ref_name: subject.to_string(),
                detail: "mock failure".into(),
            },
            OpKind::Merge => RepositoryError::MergeConflict {
                branch: subject.to_string(),
                paths: Vec::new(),
            },
            OpKind::ApplyPatch => RepositoryError::ApplyFailed {
                path: subject.to_string(),
                detail: "mock failure".into(),
            },
            OpKind::CheckoutAs | OpKind::CheckoutOntoWorkspace | OpKind::DeleteBranch => {
                RepositoryError::RefNotFound(subject.to_string())
            }
            OpKind::Fetch | OpKind::ListRemote | OpKind::Commit => {
                RepositoryError::IoError(std::io::Error::other(format!("mock failure: {}", subject)))
            }
        })
    }
}

impl Repository for MockRepository {
    fn fetch(&self, remote: &Remote) -> Result<(), RepositoryError> {
        self.record(RepoOperation::Fetch {
            remote: remote.name.clone(),
        });
        self.check_fail(OpKind::Fetch, &remote.name)
    }

    fn checkout_as(&self, remote: &Remote, branch: &str, new_branch: &str) -> Result<(), RepositoryError> {
        self.record(RepoOperation::CheckoutAs {
            remote: remote.name.clone(),
            branch: branch.to_string(),
            new_branch: new_branch.to_string(),
        });
        self.check_fail(OpKind::CheckoutAs, new_branch)?;
        let mut inner = self.inner.lock().unwrap();
        inner.branches.insert(new_branch.to_string());
        inner.current = Some(new_branch.to_string());
        Ok(())
    }

    fn checkout_onto_workspace(
        &self,
        remote: &Remote,
        branch: &str,
        _matcher: &Matcher,
    ) -> Result<(), RepositoryError> {
        self.record(RepoOperation::CheckoutOntoWorkspace {
            remote: remote.name.clone(),
            branch: branch.to_string(),
        });
        self.check_fail(OpKind::CheckoutOntoWorkspace, branch)
    }

    fn merge(&self, remote: &Remote, branch: &str) -> Result<MergeOutcome, RepositoryError> {
        self.record(RepoOperation::Merge {
            remote: remote.name.clone(),
            branch: branch.to_string(),
        });
        self.check_fail(OpKind::Merge, branch)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .merges
            .get(branch)
            .copied()
            .unwrap_or(MergeOutcome::UpToDate))
    }

    fn commit_changes(&self, message: &str) -> Result<CommitOutcome, RepositoryError> {
        self.record(RepoOperation::Commit {
            message: message.to_string(),
        });
        self.check_fail(OpKind::Commit, message)?;
        let mut inner = self.inner.lock().unwrap();
        if inner.nothing_to_commit {
            return Ok(CommitOutcome::NothingToCommit);
        }
        inner.commits += 1;
        Ok(CommitOutcome::Committed(CommitInfo {
            sha: format!("{:040x}", inner.commits),
            summary: message.lines().next().unwrap_or_default().to_string(),
            files_changed: 1,
            insertions: 1,
            deletions: 0,
        }))
    }

    fn push(&self, remote: &Remote, ref_name: &str) -> Result<(), RepositoryError> {
        self.record(RepoOperation::Push {
            remote: remote.name.clone(),
            ref_name: ref_name.to_string(),
        });
        self.check_fail(OpKind::Push, ref_name)
    }

    fn delete_branch(&self, name: &str) -> Result<(), RepositoryError> {
        self.record(RepoOperation::DeleteBranch {
            name: name.to_string(),
        });
        self.check_fail(OpKind::DeleteBranch, name)?;
        let mut inner = self.inner.lock().unwrap();
        if inner.current.as_deref() == Some(name) {
            return Err(RepositoryError::IoError(std::io::Error::other(format!(
                "cannot delete branch '{}' which is checked out",
                name
            ))));
        }
        if !inner.branches.remove(name) {
            return Err(RepositoryError::RefNotFound(branch_ref(name)));
        }
        Ok(())
    }

    fn list_remote(&self, remote: &Remote) -> Result<Vec<RemoteRef>, RepositoryError> {
        self.record(RepoOperation::ListRemote {
            remote: remote.name.clone(),
        });
        self.check_fail(OpKind::ListRemote, &remote.name)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.remote_refs.get(&remote.name).cloned().unwrap_or_default())
    }

    fn apply_patch(&self, patch: &Path) -> Result<(), RepositoryError> {
        let file = patch
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(RepoOperation::ApplyPatch { file: file.clone() });
        self.check_fail(OpKind::ApplyPatch, &file)
    }
}
