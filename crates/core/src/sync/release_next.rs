use tracing::info;

use super::Operation;
use crate::errors::SyncError;
use crate::git::Checkout;
use crate::steps::{run_steps, step};

impl Operation {
    /// Rebuild the release-next branch from upstream main plus the fork's
    /// files and patches. The local branch is kept for the CI trigger.
    pub(crate) fn sync_release_next(&self) -> Result<(), SyncError> {
        let repo = self.state().repository();
        let branches = &self.state().config().branches;
        let upstream = self.state().upstream();
        info!(
            branch = %branches.release_next,
            upstream_branch = %branches.main,
            "syncing release-next"
        );

        run_steps(
            "sync release-next",
            self.state().cancel_flag(),
            vec![
                step(|| Ok(Checkout::new(repo, &upstream, &branches.main).as_branch(&branches.release_next)?)),
                step(|| self.add_fork_files()),
                step(|| self.apply_patches()),
                step(|| self.push_branch("release-next push", &branches.release_next, false)),
            ],
        )
    }
}
