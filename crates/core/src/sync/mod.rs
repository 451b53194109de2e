//! Downstream fork synchronization.
//!
//! An [`Operation`] runs one synchronization pass over a project:
//!
//! 1. Mirror upstream releases missing downstream, then resync the existing
//!    ones with their upstream branches.
//! 2. Publish upstream tags.
//! 3. Rebuild `release-next` from upstream `main`.
//! 4. Push a CI-trigger branch and open its pull request.
//! 5. Switch the working tree back to downstream `main`.
//!
//! Every stage is fail-fast: the first failing step aborts the whole run.

mod fork_files;
mod mirror;
pub mod patches;
mod release_next;
mod resync;
pub mod trigger_ci;

use std::cell::RefCell;

use chrono::Utc;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::SyncError;
use crate::forge::PullRequestRequest;
use crate::git::{branch_ref, tag_ref, Checkout, Remote};
use crate::release::{self, Release};
use crate::state::State;
use crate::steps::{guarded, run_steps, step};

pub use patches::PATCHES_DIR;
pub use trigger_ci::CI_MARKER_FILE;

/// Statistics from a single synchronization pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Releases newly mirrored downstream.
    pub releases_mirrored: Vec<String>,
    /// Releases whose sync branch received upstream changes.
    pub releases_resynced: Vec<String>,
    /// URLs of the pull requests opened or reused.
    pub pull_requests: Vec<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// One synchronization pass over a project.
pub struct Operation {
    state: State,
    stats: RefCell<SyncStats>,
}

impl Operation {
    pub fn new(state: State) -> Self {
        Self {
            state,
            stats: RefCell::new(SyncStats::default()),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Execute the full pipeline.
    pub fn run(&self) -> Result<SyncStats, SyncError> {
        let _entered = self.state.span().enter();
        let config = self.state.config();
        info!(
            upstream = %config.upstream,
            downstream = %config.downstream,
            "starting synchronization"
        );
        *self.stats.borrow_mut() = SyncStats {
            started_at: Utc::now().to_rfc3339(),
            ..SyncStats::default()
        };

        let check_pr = !config.branches.skip_check_pr;
        run_steps(
            "run",
            self.state.cancel_flag(),
            vec![
                step(|| self.mirror_releases()),
                guarded(
                    config.tags.synchronize,
                    "Tag synchronization is disabled",
                    step(|| self.sync_tags()),
                ),
                step(|| self.sync_release_next()),
                guarded(
                    check_pr,
                    "CI check PR is disabled, not triggering CI",
                    step(|| self.trigger_ci()),
                ),
                guarded(
                    check_pr,
                    "CI check PR is disabled, not creating sync PR",
                    step(|| self.create_sync_release_next_pr()),
                ),
                step(|| self.switch_to_main()),
            ],
        )?;

        let mut stats = self.stats.borrow_mut();
        stats.completed_at = Some(Utc::now().to_rfc3339());
        info!(
            mirrored = stats.releases_mirrored.len(),
            resynced = stats.releases_resynced.len(),
            pull_requests = stats.pull_requests.len(),
            "synchronization complete"
        );
        Ok(stats.clone())
    }

    /// Fetch downstream and check out its main branch as the local main.
    pub(crate) fn switch_to_main(&self) -> Result<(), SyncError> {
        let repo = self.state.repository();
        let downstream = self.state.downstream();
        let main = &self.state.config().branches.main;
        info!(branch = %main, "switching to downstream main");
        repo.fetch(&downstream)?;
        Checkout::new(repo, &downstream, main).as_branch(main)?;
        Ok(())
    }

    /// Push `ref_name` to downstream, or only log when running dry.
    pub(crate) fn publish(&self, title: &str, ref_name: &str) -> Result<(), SyncError> {
        if self.state.config().dry_run {
            warn!("Skipping {}, because of dry run", title);
            return Ok(());
        }
        info!(ref_name, "publishing {}", title);
        self.state
            .repository()
            .push(&self.state.downstream(), ref_name)?;
        Ok(())
    }

    /// Publish a local branch, optionally deleting it afterwards.
    pub(crate) fn push_branch(&self, title: &str, branch: &str, delete_after: bool) -> Result<(), SyncError> {
        self.publish(title, &branch_ref(branch))?;
        if delete_after {
            self.state.repository().delete_branch(branch)?;
        }
        Ok(())
    }

    /// Releases found on `remote` with `search`, ascending.
    pub(crate) fn list_releases(&self, remote: &Remote, search: &Regex) -> Result<Vec<Release>, SyncError> {
        let refs = self.state.repository().list_remote(remote)?;
        Ok(release::discover(&refs, search))
    }

    pub(crate) fn sync_tags(&self) -> Result<(), SyncError> {
        let repo = self.state.repository();
        let upstream = self.state.upstream();
        let ref_name = tag_ref(&self.state.config().tags.ref_spec);
        info!(ref_name = %ref_name, "syncing tags");
        run_steps(
            "sync tags",
            self.state.cancel_flag(),
            vec![
                step(|| Ok(repo.fetch(&upstream)?)),
                step(|| self.publish("tag synchronization", &ref_name)),
            ],
        )
    }

    /// Open a pull request, or only log when running dry.
    pub(crate) fn open_pr(&self, request: &PullRequestRequest) -> Result<(), SyncError> {
        if self.state.config().dry_run {
            warn!("Skipping pull request \"{}\", because of dry run", request.title);
            return Ok(());
        }
        info!(base = %request.base, head = %request.head, "creating pull request: {}", request.title);
        let pr = self.state.forge().create_pr(request)?;
        info!(number = pr.number, url = %pr.html_url, "pull request ready");
        self.stats.borrow_mut().pull_requests.push(pr.html_url);
        Ok(())
    }

    fn record_mirrored(&self, release: Release) {
        self.stats
            .borrow_mut()
            .releases_mirrored
            .push(release.to_string());
    }

    fn record_resynced(&self, release: Release) {
        self.stats
            .borrow_mut()
            .releases_resynced
            .push(release.to_string());
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use crate::config::{Config, Project};
    use crate::forge::mock::MockForge;
    use crate::generator::MockGenerator;
    use crate::git::mock::MockRepository;
    use crate::state::State;

    use super::Operation;

    pub fn config() -> Config {
        Config::new(
            "https://github.com/knative/serving.git",
            "https://github.com/openshift-knative/serving.git",
        )
    }

    pub fn operation(
        config: Config,
        project: &Path,
        repo: &MockRepository,
        forge: &MockForge,
        generator: &MockGenerator,
    ) -> Operation {
        Operation::new(State::new(
            config,
            Project::new(project, project.join(".downsync.toml")),
            Box::new(repo.clone()),
            Box::new(forge.clone()),
            Box::new(generator.clone()),
        ))
    }
}
