use tracing::info;

use super::Operation;
use crate::errors::SyncError;
use crate::git::Checkout;
use crate::release::{self, Release};
use crate::steps::{guarded, run_steps, step, Step};

const STAGE: &str = "mirror releases";

impl Operation {
    /// Create every upstream release branch that downstream lacks, then
    /// resync the releases that already existed.
    pub(crate) fn mirror_releases(&self) -> Result<(), SyncError> {
        let missing = self.missing_releases().map_err(|e| e.in_stage(STAGE))?;
        if missing.is_empty() {
            info!("No missing releases found");
        } else {
            let names: Vec<String> = missing.iter().map(Release::to_string).collect();
            info!(releases = ?names, "found missing releases");
        }

        let resync = &self.state().config().resync_releases;
        let mut steps: Vec<Step<'_>> = missing
            .iter()
            .map(|&rel| step(move || self.mirror_release(rel)))
            .collect();
        steps.push(guarded(
            resync.enabled,
            "Resync of releases is disabled",
            step(|| self.resync_releases(&missing)),
        ));
        run_steps(STAGE, self.state().cancel_flag(), steps)
    }

    fn missing_releases(&self) -> Result<Vec<Release>, SyncError> {
        let searches = &self.state().config().branches.searches;
        let upstream = self.list_releases(&self.state().upstream(), &searches.upstream_regex()?)?;
        let downstream = self.list_releases(&self.state().downstream(), &searches.downstream_regex()?)?;
        Ok(release::missing(&upstream, &downstream))
    }

    fn mirror_release(&self, rel: Release) -> Result<(), SyncError> {
        let repo = self.state().repository();
        let templates = &self.state().config().branches.release_templates;
        let upstream = self.state().upstream();
        let upstream_branch = rel.name(&templates.upstream);
        let downstream_branch = rel.name(&templates.downstream);
        info!(
            release = %rel,
            upstream_branch = %upstream_branch,
            downstream_branch = %downstream_branch,
            "creating new release"
        );

        run_steps(
            &format!("mirror release {}", rel),
            self.state().cancel_flag(),
            vec![
                step(|| Ok(repo.fetch(&upstream)?)),
                step(|| Ok(Checkout::new(repo, &upstream, &upstream_branch).as_branch(&downstream_branch)?)),
                step(|| self.add_fork_files()),
                step(|| self.apply_patches()),
                step(|| self.switch_to_main()),
                step(|| self.push_branch("release push", &downstream_branch, true)),
            ],
        )?;
        self.record_mirrored(rel);
        Ok(())
    }
}
