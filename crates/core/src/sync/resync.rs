//! Resync of existing releases: merge each upstream release branch into a
//! temporary sync branch and propose the result as a pull request.

use tracing::{info, warn};

use super::Operation;
use crate::errors::{error_chain, join_results, SyncError};
use crate::files::Filters;
use crate::forge::PullRequestRequest;
use crate::git::{Checkout, MergeOutcome};
use crate::release::{self, Release};
use crate::steps::{commit_changes, run_steps, step, Step};

const STAGE: &str = "resync releases";

/// Switches back to main and deletes the sync branch on every exit path.
struct SyncBranchCleanup<'a> {
    op: &'a Operation,
    branch: &'a str,
    done: bool,
}

impl<'a> SyncBranchCleanup<'a> {
    fn new(op: &'a Operation, branch: &'a str) -> Self {
        Self {
            op,
            branch,
            done: false,
        }
    }

    fn cleanup(&self) -> Result<(), SyncError> {
        self.op.switch_to_main()?;
        self.op.state().repository().delete_branch(self.branch)?;
        Ok(())
    }

    /// Clean up and join any cleanup failure onto `result`.
    fn finish(mut self, result: Result<(), SyncError>) -> Result<(), SyncError> {
        self.done = true;
        join_results(result, self.cleanup())
    }
}

impl Drop for SyncBranchCleanup<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.cleanup() {
            warn!(branch = %self.branch, error = %error_chain(&e), "failed to delete sync branch");
        }
    }
}

impl Operation {
    /// Resync the trailing window of upstream releases, skipping `mirrored`.
    pub(crate) fn resync_releases(&self, mirrored: &[Release]) -> Result<(), SyncError> {
        let releases = self.resync_candidates(mirrored).map_err(|e| e.in_stage(STAGE))?;
        if releases.is_empty() {
            info!("No releases to re-sync");
            return Ok(());
        }
        let names: Vec<String> = releases.iter().map(Release::to_string).collect();
        info!(releases = ?names, "re-syncing releases");

        let steps: Vec<Step<'_>> = releases
            .iter()
            .map(|&rel| step(move || self.resync_release(rel)))
            .collect();
        run_steps(STAGE, self.state().cancel_flag(), steps)
    }

    fn resync_candidates(&self, mirrored: &[Release]) -> Result<Vec<Release>, SyncError> {
        let config = self.state().config();
        let search = config.branches.searches.upstream_regex()?;
        let upstream = self.list_releases(&self.state().upstream(), &search)?;
        Ok(release::window(
            &release::exclude(&upstream, mirrored),
            config.resync_releases.number_of,
        ))
    }

    fn resync_release(&self, rel: Release) -> Result<(), SyncError> {
        let config = self.state().config();
        let repo = self.state().repository();
        let upstream = self.state().upstream();
        let downstream = self.state().downstream();
        let templates = &config.branches.release_templates;
        let upstream_branch = rel.name(&templates.upstream);
        let downstream_branch = rel.name(&templates.downstream);
        let sync_branch = format!("{}{}", config.branches.check_pr_prefix, downstream_branch);
        let stage = format!("resync release {}", rel);
        info!(release = %rel, sync_branch = %sync_branch, "re-syncing release");
        let everything = Filters::everything()
            .matcher()
            .map_err(|e| SyncError::from(e).in_stage(&stage))?;

        Checkout::new(repo, &downstream, &downstream_branch)
            .as_branch(&sync_branch)
            .map_err(|e| SyncError::from(e).in_stage(&stage))?;
        let cleanup = SyncBranchCleanup::new(self, &sync_branch);

        let result = match repo.merge(&upstream, &upstream_branch) {
            Err(e) => Err(SyncError::from(e).in_stage(&stage)),
            Ok(MergeOutcome::UpToDate) => {
                info!(branch = %downstream_branch, "no changes detected");
                Ok(())
            }
            Ok(MergeOutcome::Merged) => {
                info!(branch = %downstream_branch, "changes detected");
                let request = PullRequestRequest {
                    title: config
                        .messages
                        .trigger_ci_title(&downstream_branch, &upstream_branch),
                    body: config
                        .messages
                        .trigger_ci_body(&downstream_branch, &upstream_branch),
                    base: downstream_branch.clone(),
                    head: sync_branch.clone(),
                    labels: config.sync_labels.clone(),
                };
                run_steps(
                    &stage,
                    self.state().cancel_flag(),
                    vec![
                        step(|| Ok(Checkout::new(repo, &upstream, &upstream_branch).onto_workspace(&everything)?)),
                        step(|| self.generate_images()),
                        commit_changes(repo, &config.messages.images_generated, Vec::new()),
                        step(|| self.push_branch("sync branch push", &sync_branch, false)),
                        step(|| self.open_pr(&request)),
                    ],
                )
                .map(|()| self.record_resynced(rel))
            }
        };
        cleanup.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, operation};
    use super::*;
    use crate::config::Config;
    use crate::forge::mock::MockForge;
    use crate::generator::MockGenerator;
    use crate::git::mock::{MockRepository, OpKind, RepoOperation};
    use crate::git::Repository;

    fn resync_config(window: usize) -> Config {
        let mut cfg = config();
        cfg.resync_releases.enabled = true;
        cfg.resync_releases.number_of = window;
        cfg
    }

    fn sync_checkouts(repo: &MockRepository) -> Vec<String> {
        repo.operations()
            .into_iter()
            .filter_map(|op| match op {
                RepoOperation::CheckoutAs { new_branch, .. } if new_branch.starts_with("ci/") => Some(new_branch),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_window_and_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new().with_branches(
            "upstream",
            &["release-1.0", "release-1.1", "release-1.2", "release-1.3"],
        );
        let op = operation(resync_config(2), dir.path(), &repo, &MockForge::new(), &MockGenerator::new());

        op.resync_releases(&[Release::new(1, 3)]).unwrap();
        assert_eq!(sync_checkouts(&repo), vec!["ci/release-1.1", "ci/release-1.2"]);
    }

    #[test]
    fn test_up_to_date_release_only_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new().with_branches("upstream", &["release-1.0"]);
        let forge = MockForge::new();
        let op = operation(resync_config(6), dir.path(), &repo, &forge, &MockGenerator::new());

        op.resync_releases(&[]).unwrap();

        assert!(repo.pushes().is_empty());
        assert_eq!(forge.pr_count(), 0);
        assert!(!repo.local_branches().contains(&"ci/release-1.0".to_string()));
        assert_eq!(repo.current_branch().as_deref(), Some("main"));
    }

    #[test]
    fn test_merged_release_is_pushed_and_proposed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new()
            .with_branches("upstream", &["release-1.0"])
            .with_merge("release-1.0", MergeOutcome::Merged);
        let forge = MockForge::new();
        let generator = MockGenerator::new();
        let op = operation(resync_config(6), dir.path(), &repo, &forge, &generator);

        op.resync_releases(&[]).unwrap();

        assert_eq!(repo.pushes(), vec!["refs/heads/ci/release-1.0"]);
        assert_eq!(generator.calls(), 1);
        let requests = forge.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].base, "release-1.0");
        assert_eq!(requests[0].head, "ci/release-1.0");
        assert_eq!(
            requests[0].title,
            config().messages.trigger_ci_title("release-1.0", "release-1.0")
        );
        assert!(repo
            .operations()
            .contains(&RepoOperation::DeleteBranch { name: "ci/release-1.0".into() }));
    }

    #[test]
    fn test_clean_commit_still_counts_as_changes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new()
            .with_branches("upstream", &["release-1.0"])
            .with_merge("release-1.0", MergeOutcome::Merged)
            .with_nothing_to_commit();
        let forge = MockForge::new();
        let op = operation(resync_config(6), dir.path(), &repo, &forge, &MockGenerator::new());

        op.resync_releases(&[]).unwrap();
        assert_eq!(repo.pushes(), vec!["refs/heads/ci/release-1.0"]);
        assert_eq!(forge.pr_count(), 1);
    }

    #[test]
    fn test_pr_failure_still_deletes_sync_branch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new()
            .with_branches("upstream", &["release-1.0", "release-1.1"])
            .with_merge("release-1.0", MergeOutcome::Merged);
        let op = operation(resync_config(6), dir.path(), &repo, &MockForge::failing(500), &MockGenerator::new());

        let err = op.resync_releases(&[]).unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed { ref stage, .. } if stage == "resync release 1.0"));
        assert!(repo
            .operations()
            .contains(&RepoOperation::DeleteBranch { name: "ci/release-1.0".into() }));
        assert!(repo.local_branches().iter().all(|b| !b.starts_with("ci/")));
        // Fail-fast: release 1.1 is never touched.
        assert_eq!(sync_checkouts(&repo), vec!["ci/release-1.0"]);
    }

    #[test]
    fn test_cleanup_failure_is_joined() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new()
            .with_branches("upstream", &["release-1.0"])
            .fail_on(OpKind::Merge, "release-1.0")
            .fail_on(OpKind::DeleteBranch, "ci/release-1.0");
        let op = operation(resync_config(6), dir.path(), &repo, &MockForge::new(), &MockGenerator::new());

        let err = op.resync_releases(&[]).unwrap_err();
        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert!(matches!(causes[0], SyncError::SyncFailed { .. }));
        assert!(matches!(causes[1], SyncError::RemoteOperationFailed(_)));
    }

    #[test]
    fn test_dropped_guard_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new();
        let op = operation(resync_config(6), dir.path(), &repo, &MockForge::new(), &MockGenerator::new());
        repo.checkout_as(&op.state().downstream(), "release-1.0", "ci/release-1.0")
            .unwrap();
        drop(SyncBranchCleanup::new(&op, "ci/release-1.0"));
        assert!(!repo.local_branches().contains(&"ci/release-1.0".to_string()));
    }
}
