use tracing::{debug, info};

use super::Operation;
use crate::errors::SyncError;
use crate::files::{delete_files, Matcher};
use crate::git::Checkout;
use crate::steps::{commit_changes, run_steps, step};

impl Operation {
    /// Replace upstream-only files with the fork's own files on the checked
    /// out branch, then regenerate derived artifacts.
    ///
    /// Produces up to two commits: the fork files, and the generated images.
    pub(crate) fn add_fork_files(&self) -> Result<(), SyncError> {
        let config = self.state().config();
        let repo = self.state().repository();
        let downstream = self.state().downstream();
        let unwanted = config.delete_from_upstream.matcher()?;
        let fork_files = config.copy_from_midstream.matcher()?;
        info!("adding fork specific files");

        run_steps(
            "add fork files",
            self.state().cancel_flag(),
            vec![
                step(|| self.remove_unwanted_upstream_files(&unwanted)),
                step(|| {
                    Ok(Checkout::new(repo, &downstream, &config.branches.main).onto_workspace(&fork_files)?)
                }),
                commit_changes(repo, &config.messages.apply_fork_files, Vec::new()),
                step(|| self.generate_images()),
                commit_changes(repo, &config.messages.images_generated, Vec::new()),
            ],
        )
    }

    fn remove_unwanted_upstream_files(&self, unwanted: &Matcher) -> Result<(), SyncError> {
        let root = &self.state().project().path;
        let removed = delete_files(root, unwanted).map_err(|e| {
            SyncError::workspace(
                format!("failed to remove upstream files under {}", root.display()),
                e,
            )
        })?;
        if removed.is_empty() {
            debug!("no unwanted upstream files");
        } else {
            info!(count = removed.len(), files = ?removed, "removed unwanted upstream files");
        }
        Ok(())
    }

    pub(crate) fn generate_images(&self) -> Result<(), SyncError> {
        info!("generating images");
        self.state()
            .generator()
            .generate(&self.state().project().path)?;
        Ok(())
    }
}
