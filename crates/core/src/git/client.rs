//! Repository capability backed by `git2`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::CheckoutBuilder;
use git2::{
    ApplyLocation, AutotagOption, BranchType, Cred, CredentialType, Diff, Direction, FetchOptions,
    IndexAddOption, ObjectType, PushOptions, RemoteCallbacks, ResetType, Signature, TreeEntry,
    TreeWalkMode, TreeWalkResult,
};
use tracing::{debug, info, instrument, warn};

use super::{branch_ref, CommitInfo, CommitOutcome, MergeOutcome, Remote, RemoteRef, Repository};
use crate::errors::RepositoryError;
use crate::files::Matcher;

/// Author used when the repository has no `user.name` / `user.email`.
const FALLBACK_AUTHOR: (&str, &str) = ("downsync", "downsync@localhost");

/// Git repository wrapping a `git2::Repository` with a working tree.
pub struct Git2Repository {
    repo: git2::Repository,
    path: PathBuf,
    token: Option<String>,
}

impl Git2Repository {
    /// Open an existing repository. `token` authenticates HTTPS remotes.
    pub fn open<P: AsRef<Path>>(path: P, token: Option<String>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = git2::Repository::open(path)
            .map_err(|_| RepositoryError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            token,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> &git2::Repository {
        &self.repo
    }

    /// URL of the remote called `name`, if the repository has one.
    pub fn remote_url(&self, name: &str) -> Option<String> {
        self.repo.find_remote(name).ok()?.url().map(String::from)
    }

    fn workdir(&self) -> Result<&Path, RepositoryError> {
        self.repo
            .workdir()
            .ok_or_else(|| RepositoryError::RepositoryNotFound(format!("{} (bare)", self.path.display())))
    }

    fn signature(&self) -> Result<Signature<'static>, RepositoryError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now(FALLBACK_AUTHOR.0, FALLBACK_AUTHOR.1)?),
        }
    }

    /// Look up `remote`, creating it or re-pointing its URL as needed.
    fn ensure_remote(&self, remote: &Remote) -> Result<git2::Remote<'_>, RepositoryError> {
        match self.repo.find_remote(&remote.name) {
            Ok(existing) if existing.url() == Some(remote.url.as_str()) => Ok(existing),
            Ok(_) => {
                debug!(remote = %remote.name, url = %remote.url, "updating remote url");
                self.repo.remote_set_url(&remote.name, &remote.url)?;
                Ok(self.repo.find_remote(&remote.name)?)
            }
            Err(_) => {
                debug!(remote = %remote.name, url = %remote.url, "adding remote");
                Ok(self.repo.remote(&remote.name, &remote.url)?)
            }
        }
    }

    /// Credentials: the token for HTTPS, then the SSH agent, then
    /// `~/.ssh/id_rsa`. libgit2 re-invokes the callback after a rejected
    /// credential, so attempts are capped.
    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let token = self.token.clone();
        let mut attempts = 0u32;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username, allowed| {
            attempts += 1;
            if attempts > 3 {
                return Err(git2::Error::from_str(&format!("authentication failed for {}", url)));
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(tok) = token.as_deref() {
                    return Cred::userpass_plaintext("x-access-token", tok);
                }
            }
            if allowed.contains(CredentialType::SSH_KEY) {
                let user = username.unwrap_or("git");
                if attempts == 1 {
                    return Cred::ssh_key_from_agent(user);
                }
                if let Some(key) = dirs::home_dir().map(|home| home.join(".ssh").join("id_rsa")) {
                    if key.exists() {
                        return Cred::ssh_key(user, None, &key, None);
                    }
                }
            }
            if allowed.contains(CredentialType::DEFAULT) {
                return Cred::default();
            }
            Err(git2::Error::from_str(&format!("no credentials available for {}", url)))
        });
        callbacks
    }

    fn fetch_refspecs(
        &self,
        remote: &Remote,
        refspecs: &[String],
        tags: AutotagOption,
    ) -> Result<(), RepositoryError> {
        let mut git_remote = self.ensure_remote(remote)?;
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(self.callbacks());
        opts.download_tags(tags);
        git_remote.fetch(refspecs, Some(&mut opts), None)?;
        Ok(())
    }

    /// Fetch a single branch into `refs/remotes/<remote>/<branch>` and return
    /// its tip.
    fn fetch_branch(&self, remote: &Remote, branch: &str) -> Result<git2::Commit<'_>, RepositoryError> {
        let tracking = format!("refs/remotes/{}/{}", remote.name, branch);
        let refspec = format!("+{}:{}", branch_ref(branch), tracking);
        self.fetch_refspecs(remote, &[refspec], AutotagOption::Auto)?;
        let reference = self
            .repo
            .find_reference(&tracking)
            .map_err(|_| RepositoryError::RefNotFound(format!("{}/{}", remote.name, branch)))?;
        Ok(reference.peel_to_commit()?)
    }

    fn write_blob(&self, workdir: &Path, rel: &str, entry: &TreeEntry<'_>) -> Result<(), RepositoryError> {
        let blob = self.repo.find_blob(entry.id())?;
        let target = workdir.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, blob.content())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if entry.filemode() == 0o100755 {
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }
}

impl Repository for Git2Repository {
    #[instrument(skip(self), fields(remote = %remote.name))]
    fn fetch(&self, remote: &Remote) -> Result<(), RepositoryError> {
        info!("fetching");
        self.fetch_refspecs(remote, &[], AutotagOption::All)?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote.name))]
    fn checkout_as(&self, remote: &Remote, branch: &str, new_branch: &str) -> Result<(), RepositoryError> {
        let commit = self.fetch_branch(remote, branch)?;
        self.repo.set_head_detached(commit.id())?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        self.repo.branch(new_branch, &commit, true)?;
        self.repo.set_head(&branch_ref(new_branch))?;
        info!(sha = %commit.id(), "checked out branch");
        Ok(())
    }

    #[instrument(skip(self, matcher), fields(remote = %remote.name))]
    fn checkout_onto_workspace(
        &self,
        remote: &Remote,
        branch: &str,
        matcher: &Matcher,
    ) -> Result<(), RepositoryError> {
        let commit = self.fetch_branch(remote, branch)?;
        let tree = commit.tree()?;
        let workdir = self.workdir()?.to_path_buf();

        let mut written = 0usize;
        let mut failure: Option<RepositoryError> = None;
        let walked = tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() != Some(ObjectType::Blob) {
                return TreeWalkResult::Ok;
            }
            let Some(name) = entry.name() else {
                return TreeWalkResult::Ok;
            };
            let rel = format!("{}{}", dir, name);
            if !matcher.matches(&rel) {
                return TreeWalkResult::Ok;
            }
            match self.write_blob(&workdir, &rel, entry) {
                Ok(()) => {
                    written += 1;
                    TreeWalkResult::Ok
                }
                Err(e) => {
                    failure = Some(e);
                    TreeWalkResult::Abort
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        walked?;
        info!(files = written, "copied files onto workspace");
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote.name))]
    fn merge(&self, remote: &Remote, branch: &str) -> Result<MergeOutcome, RepositoryError> {
        let theirs = self.fetch_branch(remote, branch)?;
        let annotated = self.repo.find_annotated_commit(theirs.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            info!("already up to date");
            return Ok(MergeOutcome::UpToDate);
        }

        let head = self.repo.head()?;
        let ours = head.peel_to_commit()?;

        if analysis.is_fast_forward() {
            let head_name = head
                .name()
                .ok_or_else(|| RepositoryError::RefNotFound("HEAD".into()))?;
            self.repo.find_reference(head_name)?.set_target(
                theirs.id(),
                &format!("downsync: fast-forward to {}/{}", remote.name, branch),
            )?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
            info!(sha = %theirs.id(), "fast-forwarded");
            return Ok(MergeOutcome::Merged);
        }

        self.repo.merge(&[&annotated], None, None)?;
        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            let paths: Vec<String> = index
                .conflicts()?
                .filter_map(Result::ok)
                .filter_map(|c| c.our.or(c.their).or(c.ancestor))
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
            warn!(?paths, "merge conflict, aborting");
            self.repo.cleanup_state()?;
            self.repo.reset(ours.as_object(), ResetType::Hard, None)?;
            return Err(RepositoryError::MergeConflict {
                branch: format!("{}/{}", remote.name, branch),
                paths,
            });
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let sig = self.signature()?;
        let message = format!("Merge {}/{}", remote.name, branch);
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&ours, &theirs])?;
        self.repo.cleanup_state()?;
        info!(sha = %oid, "created merge commit");
        Ok(MergeOutcome::Merged)
    }

    #[instrument(skip(self, message))]
    fn commit_changes(&self, message: &str) -> Result<CommitOutcome, RepositoryError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_oid) {
            debug!("working tree matches HEAD");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.signature()?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        let parent_tree = parent.as_ref().map(|p| p.tree()).transpose()?;
        let stats = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?
            .stats()?;
        info!(sha = %oid, "created commit");
        Ok(CommitOutcome::Committed(CommitInfo {
            sha: oid.to_string(),
            summary: message.lines().next().unwrap_or_default().to_string(),
            files_changed: stats.files_changed(),
            insertions: stats.insertions(),
            deletions: stats.deletions(),
        }))
    }

    #[instrument(skip(self), fields(remote = %remote.name))]
    fn push(&self, remote: &Remote, ref_name: &str) -> Result<(), RepositoryError> {
        // Branches are force-pushed: release-next and CI branches are rebuilt
        // from upstream on every run. Tags never are.
        let refspecs: Vec<String> = if ref_name.contains('*') {
            let mut specs = Vec::new();
            for reference in self.repo.references_glob(ref_name)? {
                if let Some(name) = reference?.name() {
                    specs.push(format!("{}:{}", name, name));
                }
            }
            specs
        } else if ref_name.starts_with("refs/heads/") {
            vec![format!("+{}:{}", ref_name, ref_name)]
        } else {
            vec![format!("{}:{}", ref_name, ref_name)]
        };
        if refspecs.is_empty() {
            warn!("no local refs match, nothing to push");
            return Ok(());
        }

        info!(refs = refspecs.len(), "pushing");
        let mut git_remote = self.ensure_remote(remote)?;
        let mut callbacks = self.callbacks();
        let rejected = Arc::new(Mutex::new(None::<(String, String)>));
        let rejected_clone = rejected.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                if let Ok(mut slot) = rejected_clone.lock() {
                    *slot = Some((refname.to_string(), msg.to_string()));
                }
            }
            Ok(())
        });
        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);
        git_remote.push(&refspecs, Some(&mut opts))?;

        if let Some((ref_name, detail)) = rejected.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(RepositoryError::PushRejected { ref_name, detail });
        }
        info!("push completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_branch(&self, name: &str) -> Result<(), RepositoryError> {
        let mut branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| RepositoryError::RefNotFound(branch_ref(name)))?;
        branch.delete()?;
        info!("deleted branch");
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote.name))]
    fn list_remote(&self, remote: &Remote) -> Result<Vec<RemoteRef>, RepositoryError> {
        let mut git_remote = self.ensure_remote(remote)?;
        let connection = git_remote.connect_auth(Direction::Fetch, Some(self.callbacks()), None)?;
        let refs: Vec<RemoteRef> = connection
            .list()?
            .iter()
            .map(|head| RemoteRef::new(head.name(), head.oid().to_string()))
            .collect();
        debug!(count = refs.len(), "listed remote refs");
        Ok(refs)
    }

    #[instrument(skip(self), fields(patch = %patch.display()))]
    fn apply_patch(&self, patch: &Path) -> Result<(), RepositoryError> {
        let failed = |e: git2::Error| RepositoryError::ApplyFailed {
            path: patch.display().to_string(),
            detail: e.message().to_string(),
        };
        let bytes = std::fs::read(patch)?;
        let diff = Diff::from_buffer(&bytes).map_err(failed)?;
        self.repo
            .apply(&diff, ApplyLocation::WorkDir, None)
            .map_err(failed)?;
        info!("patch applied");
        Ok(())
    }
}
