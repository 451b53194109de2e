//! Carried patches: fork-only changes kept as `*.patch` files in the project
//! and re-applied on every synced branch.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use super::Operation;
use crate::errors::SyncError;
use crate::steps::{commit_changes, run_steps, step, Step};

/// Project-relative directory holding carried patches.
pub const PATCHES_DIR: &str = "openshift/patches";

/// Regular `*.patch` files directly inside `dir`, sorted by file name.
///
/// A missing directory yields an empty list.
pub fn find_patches(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut patches = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "patch") {
            patches.push(path);
        }
    }
    patches.sort();
    Ok(patches)
}

impl Operation {
    pub(crate) fn apply_patches(&self) -> Result<(), SyncError> {
        let repo = self.state().repository();
        let dir = self.state().project().path.join(PATCHES_DIR);
        let patches = find_patches(&dir)
            .map_err(|e| SyncError::workspace(format!("failed to list patches in {}", dir.display()), e))?;
        if patches.is_empty() {
            info!(dir = %dir.display(), "No patches found");
            return Ok(());
        }
        info!(count = patches.len(), "applying patches");

        let mut steps: Vec<Step<'_>> = patches
            .iter()
            .map(|patch| {
                step(move || {
                    info!(patch = %patch.display(), "applying patch");
                    Ok(repo.apply_patch(patch)?)
                })
            })
            .collect();
        steps.push(commit_changes(
            repo,
            &self.state().config().messages.apply_patches,
            Vec::new(),
        ));
        run_steps("apply patches", self.state().cancel_flag(), steps)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, operation};
    use super::*;
    use crate::forge::mock::MockForge;
    use crate::generator::MockGenerator;
    use crate::git::mock::{MockRepository, OpKind, RepoOperation};

    fn patches_dir(root: &Path) -> PathBuf {
        let dir = root.join(PATCHES_DIR);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_find_patches_filters_and_sorts() {
        let root = tempfile::tempdir().unwrap();
        let dir = patches_dir(root.path());
        fs::write(dir.join("002-b.patch"), "b").unwrap();
        fs::write(dir.join("001-a.patch"), "a").unwrap();
        fs::write(dir.join("README.md"), "docs").unwrap();
        fs::create_dir(dir.join("nested.patch")).unwrap();

        let names: Vec<String> = find_patches(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["001-a.patch", "002-b.patch"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(find_patches(&root.path().join(PATCHES_DIR)).unwrap().is_empty());
    }

    #[test]
    fn test_no_patches_makes_no_commit() {
        let root = tempfile::tempdir().unwrap();
        let repo = MockRepository::new();
        let op = operation(config(), root.path(), &repo, &MockForge::new(), &MockGenerator::new());

        op.apply_patches().unwrap();
        assert!(repo.operations().is_empty());
    }

    #[test]
    fn test_applies_in_order_then_commits_once() {
        let root = tempfile::tempdir().unwrap();
        let dir = patches_dir(root.path());
        fs::write(dir.join("002-b.patch"), "b").unwrap();
        fs::write(dir.join("001-a.patch"), "a").unwrap();
        let repo = MockRepository::new();
        let op = operation(config(), root.path(), &repo, &MockForge::new(), &MockGenerator::new());

        op.apply_patches().unwrap();
        assert_eq!(
            repo.operations(),
            vec![
                RepoOperation::ApplyPatch { file: "001-a.patch".into() },
                RepoOperation::ApplyPatch { file: "002-b.patch".into() },
                RepoOperation::Commit { message: config().messages.apply_patches },
            ]
        );
    }

    #[test]
    fn test_failed_patch_stops_before_commit() {
        let root = tempfile::tempdir().unwrap();
        let dir = patches_dir(root.path());
        fs::write(dir.join("001-a.patch"), "a").unwrap();
        fs::write(dir.join("002-b.patch"), "b").unwrap();
        let repo = MockRepository::new().fail_on(OpKind::ApplyPatch, "001-a.patch");
        let op = operation(config(), root.path(), &repo, &MockForge::new(), &MockGenerator::new());

        let err = op.apply_patches().unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed { ref stage, .. } if stage == "apply patches"));
        assert_eq!(repo.operations().len(), 1);
    }
}
