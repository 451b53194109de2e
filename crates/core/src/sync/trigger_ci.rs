//! CI trigger: a throwaway commit on top of release-next, pushed to a
//! dedicated branch so that downstream CI runs against it.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info};

use super::Operation;
use crate::errors::SyncError;
use crate::forge::PullRequestRequest;
use crate::git::Checkout;
use crate::steps::{commit_changes, run_steps, step};

/// Marker file at the project root rewritten on every trigger.
pub const CI_MARKER_FILE: &str = "ci";

impl Operation {
    fn ci_branch(&self) -> String {
        let branches = &self.state().config().branches;
        format!("{}{}", branches.check_pr_prefix, branches.release_next)
    }

    pub(crate) fn trigger_ci(&self) -> Result<(), SyncError> {
        let config = self.state().config();
        let repo = self.state().repository();
        let downstream = self.state().downstream();
        let ci_branch = self.ci_branch();
        let title = config
            .messages
            .trigger_ci_title(&config.branches.release_next, &config.branches.main);
        info!(branch = %ci_branch, "triggering CI");

        run_steps(
            "trigger CI",
            self.state().cancel_flag(),
            vec![
                step(|| {
                    Ok(Checkout::new(repo, &downstream, &config.branches.release_next).as_branch(&ci_branch)?)
                }),
                step(|| self.write_ci_marker()),
                commit_changes(repo, &title, Vec::new()),
                step(|| self.push_branch("CI trigger push", &ci_branch, false)),
            ],
        )
    }

    fn write_ci_marker(&self) -> Result<(), SyncError> {
        let path = self.state().project().path.join(CI_MARKER_FILE);
        write_owner_only(&path, Utc::now().to_rfc3339().as_bytes())
            .map_err(|e| SyncError::workspace(format!("failed to write {}", path.display()), e))?;
        debug!(path = %path.display(), "CI marker written");
        Ok(())
    }

    pub(crate) fn create_sync_release_next_pr(&self) -> Result<(), SyncError> {
        let config = self.state().config();
        let branches = &config.branches;
        let request = PullRequestRequest {
            title: config
                .messages
                .trigger_ci_title(&branches.release_next, &branches.main),
            body: config
                .messages
                .trigger_ci_body(&branches.release_next, &branches.main),
            base: branches.release_next.clone(),
            head: self.ci_branch(),
            labels: config.sync_labels.clone(),
        };
        run_steps(
            "create sync release-next PR",
            self.state().cancel_flag(),
            vec![step(|| self.open_pr(&request))],
        )
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, operation};
    use super::*;
    use crate::forge::mock::MockForge;
    use crate::generator::MockGenerator;
    use crate::git::mock::{MockRepository, OpKind, RepoOperation};

    #[test]
    fn test_trigger_ci_writes_marker_commits_and_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new();
        let op = operation(config(), dir.path(), &repo, &MockForge::new(), &MockGenerator::new());

        op.trigger_ci().unwrap();

        let marker = std::fs::read_to_string(dir.path().join(CI_MARKER_FILE)).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(marker.trim()).is_ok());

        let title = config().messages.trigger_ci_title("release-next", "main");
        assert_eq!(
            repo.operations(),
            vec![
                RepoOperation::CheckoutAs {
                    remote: "downstream".into(),
                    branch: "release-next".into(),
                    new_branch: "ci/release-next".into(),
                },
                RepoOperation::Commit { message: title },
                RepoOperation::Push {
                    remote: "downstream".into(),
                    ref_name: "refs/heads/ci/release-next".into(),
                },
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_marker_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let op = operation(
            config(),
            dir.path(),
            &MockRepository::new(),
            &MockForge::new(),
            &MockGenerator::new(),
        );
        op.trigger_ci().unwrap();
        let mode = std::fs::metadata(dir.path().join(CI_MARKER_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_checkout_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MockRepository::new().fail_on(OpKind::CheckoutAs, "ci/release-next");
        let op = operation(config(), dir.path(), &repo, &MockForge::new(), &MockGenerator::new());

        assert!(op.trigger_ci().is_err());
        assert!(!dir.path().join(CI_MARKER_FILE).exists());
    }

    #[test]
    fn test_sync_pr_request() {
        let dir = tempfile::tempdir().unwrap();
        let forge = MockForge::new();
        let op = operation(config(), dir.path(), &MockRepository::new(), &forge, &MockGenerator::new());

        op.create_sync_release_next_pr().unwrap();

        let requests = forge.requests();
        assert_eq!(requests.len(), 1);
        let cfg = config();
        assert_eq!(requests[0].title, cfg.messages.trigger_ci_title("release-next", "main"));
        assert_eq!(requests[0].body, cfg.messages.trigger_ci_body("release-next", "main"));
        assert_eq!(requests[0].base, "release-next");
        assert_eq!(requests[0].head, "ci/release-next");
        assert_eq!(requests[0].labels, vec!["kind/sync-fork-to-upstream"]);
    }

    #[test]
    fn test_sync_pr_skipped_on_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let forge = MockForge::new();
        let mut cfg = config();
        cfg.dry_run = true;
        let op = operation(cfg, dir.path(), &MockRepository::new(), &forge, &MockGenerator::new());

        op.create_sync_release_next_pr().unwrap();
        assert_eq!(forge.pr_count(), 0);
    }

    #[test]
    fn test_sync_pr_failure_names_stage() {
        let dir = tempfile::tempdir().unwrap();
        let op = operation(
            config(),
            dir.path(),
            &MockRepository::new(),
            &MockForge::failing(422),
            &MockGenerator::new(),
        );
        let err = op.create_sync_release_next_pr().unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed { ref stage, .. } if stage == "create sync release-next PR"));
    }
}
