//! End-to-end synchronization against real local git repositories.
//!
//! - Upstream: a non-bare repository with release branches and a tag
//! - Downstream: a bare repository seeded with the fork's `main`
//! - Project: an empty repository opened through `Git2Repository`
//!
//! No network I/O: remotes are plain filesystem paths.

use std::path::Path;

use git2::{BranchType, Signature};
use tempfile::TempDir;

use downsync_core::config::{Config, Project};
use downsync_core::forge::mock::MockForge;
use downsync_core::generator::MockGenerator;
use downsync_core::git::Git2Repository;
use downsync_core::{Operation, State};

// ===========================================================================
// Helpers
// ===========================================================================

fn sig() -> Signature<'static> {
    Signature::now("Test", "test@test.com").unwrap()
}

/// Commit `files` on top of `branch` without touching HEAD.
fn commit_on(repo: &git2::Repository, branch: &str, files: &[(&str, &str)], message: &str) -> git2::Oid {
    let workdir = repo.workdir().unwrap();
    let refname = format!("refs/heads/{}", branch);
    let parent = repo
        .find_reference(&refname)
        .ok()
        .map(|r| r.peel_to_commit().unwrap());
    let mut index = repo.index().unwrap();
    match &parent {
        Some(p) => index.read_tree(&p.tree().unwrap()).unwrap(),
        None => index.clear().unwrap(),
    }
    for (path, content) in files {
        let full = workdir.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, content).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some(&refname), &sig(), &sig(), message, &tree, &parents)
        .unwrap()
}

/// Copy every branch of `from` into the bare repository `into`.
fn fetch_all(into: &git2::Repository, from: &Path) {
    let mut remote = into.remote_anonymous(from.to_str().unwrap()).unwrap();
    remote
        .fetch(&["+refs/heads/*:refs/heads/*"], None, None)
        .unwrap();
}

fn file_on(repo: &git2::Repository, refname: &str, path: &str) -> Option<String> {
    let tree = repo
        .find_reference(refname)
        .ok()?
        .peel_to_commit()
        .ok()?
        .tree()
        .ok()?;
    let entry = tree.get_path(Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(String::from_utf8_lossy(blob.content()).into_owned())
}

struct Env {
    upstream_dir: TempDir,
    upstream: git2::Repository,
    downstream_dir: TempDir,
    downstream: git2::Repository,
    project_dir: TempDir,
}

impl Env {
    /// Upstream with `release-1.0`, `release-1.1` and tag `v1.1.0`; downstream
    /// with the fork's `main` and an already mirrored `release-1.0`.
    fn new() -> Self {
        let upstream_dir = tempfile::tempdir().unwrap();
        let upstream = git2::Repository::init(upstream_dir.path()).unwrap();
        commit_on(&upstream, "main", &[("README.md", "upstream main\n")], "init");
        commit_on(&upstream, "release-1.0", &[("VERSION", "1.0\n")], "release 1.0");
        let v11 = commit_on(&upstream, "release-1.1", &[("VERSION", "1.1\n")], "release 1.1");
        upstream
            .tag_lightweight("v1.1.0", &upstream.find_object(v11, None).unwrap(), false)
            .unwrap();

        let seed_dir = tempfile::tempdir().unwrap();
        let seed = git2::Repository::init(seed_dir.path()).unwrap();
        commit_on(
            &seed,
            "main",
            &[
                ("openshift/release/Dockerfile", "FROM fork\n"),
                ("OWNERS", "fork-approvers\n"),
            ],
            "fork main",
        );
        commit_on(&seed, "release-1.0", &[("VERSION", "1.0\n")], "mirrored 1.0");

        let downstream_dir = tempfile::tempdir().unwrap();
        let downstream = git2::Repository::init_bare(downstream_dir.path()).unwrap();
        fetch_all(&downstream, seed_dir.path());

        let project_dir = tempfile::tempdir().unwrap();
        git2::Repository::init(project_dir.path()).unwrap();

        Self {
            upstream_dir,
            upstream,
            downstream_dir,
            downstream,
            project_dir,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::new(
            self.upstream_dir.path().to_str().unwrap(),
            self.downstream_dir.path().to_str().unwrap(),
        );
        config.branches.skip_check_pr = true;
        config
    }

    fn operation(&self, config: Config, forge: &MockForge) -> Operation {
        let project = self.project_dir.path();
        let repo = Git2Repository::open(project, None).unwrap();
        Operation::new(State::new(
            config,
            Project::new(project, project.join(".downsync.toml")),
            Box::new(repo),
            Box::new(forge.clone()),
            Box::new(MockGenerator::new()),
        ))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn mirrors_release_with_fork_files_and_tags() {
    let env = Env::new();
    let stats = env
        .operation(env.config(), &MockForge::new())
        .run()
        .unwrap();

    assert_eq!(stats.releases_mirrored, vec!["1.1"]);

    let down = &env.downstream;
    assert_eq!(
        file_on(down, "refs/heads/release-1.1", "VERSION").as_deref(),
        Some("1.1\n")
    );
    assert_eq!(
        file_on(down, "refs/heads/release-1.1", "openshift/release/Dockerfile").as_deref(),
        Some("FROM fork\n")
    );
    let tip = down
        .find_reference("refs/heads/release-1.1")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    assert_eq!(tip.summary(), Some(":open_file_folder: Apply fork specific files"));

    assert_eq!(
        file_on(down, "refs/heads/release-next", "README.md").as_deref(),
        Some("upstream main\n")
    );
    assert!(file_on(down, "refs/heads/release-next", "OWNERS").is_some());
    assert!(down.find_reference("refs/tags/v1.1.0").is_ok());

    // The mirrored release 1.0 is left alone.
    assert!(file_on(down, "refs/heads/release-1.0", "OWNERS").is_none());

    let project = git2::Repository::open(env.project_dir.path()).unwrap();
    assert_eq!(project.head().unwrap().shorthand(), Some("main"));
    assert!(project.find_branch("release-1.1", BranchType::Local).is_err());
}

#[test]
fn dry_run_leaves_downstream_untouched() {
    let env = Env::new();
    let before: Vec<String> = env
        .downstream
        .references()
        .unwrap()
        .filter_map(|r| r.ok().and_then(|r| r.name().map(String::from)))
        .collect();

    let mut config = env.config();
    config.dry_run = true;
    env.operation(config, &MockForge::new()).run().unwrap();

    let after: Vec<String> = env
        .downstream
        .references()
        .unwrap()
        .filter_map(|r| r.ok().and_then(|r| r.name().map(String::from)))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn resync_merges_upstream_fixes_into_sync_branch() {
    let env = Env::new();
    // Downstream release-1.0 is unrelated history here; rebuild it on top of
    // upstream's so the merge has a common base.
    let mut remote = env
        .downstream
        .remote_anonymous(env.upstream_dir.path().to_str().unwrap())
        .unwrap();
    remote
        .fetch(&["+refs/heads/release-1.0:refs/heads/release-1.0"], None, None)
        .unwrap();
    commit_on(&env.upstream, "release-1.0", &[("FIX", "backport\n")], "upstream fix");

    let forge = MockForge::new();
    let mut config = env.config();
    config.resync_releases.enabled = true;
    let stats = env.operation(config, &forge).run().unwrap();

    assert_eq!(stats.releases_resynced, vec!["1.0"]);
    assert_eq!(
        file_on(&env.downstream, "refs/heads/ci/release-1.0", "FIX").as_deref(),
        Some("backport\n")
    );
    let requests = forge.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].base, "release-1.0");
    assert_eq!(requests[0].head, "ci/release-1.0");

    let project = git2::Repository::open(env.project_dir.path()).unwrap();
    assert!(project.find_branch("ci/release-1.0", BranchType::Local).is_err());
}
