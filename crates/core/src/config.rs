//! TOML-based configuration for downsync.
//!
//! The GitHub token is never stored in the file: `github.token_env` names the
//! environment variable holding it, resolved at runtime via
//! [`Config::resolve_env_vars`].

use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::files::Filters;
use crate::git::remote_url;

/// File names probed, in order, under the project root when no explicit
/// configuration path is given.
pub const CONFIG_FILE_NAMES: [&str; 2] = [".downsync.toml", ".github/downsync.toml"];

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// The working tree being synchronized and the config file that drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub path: PathBuf,
    pub config_path: PathBuf,
}

impl Project {
    pub fn new(path: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config_path: config_path.into(),
        }
    }

    /// Resolve the project from command-line inputs.
    ///
    /// With an explicit config file the project defaults to the git root
    /// above that file; otherwise it defaults to the git root above the
    /// current directory and the config file is looked up under it
    /// ([`CONFIG_FILE_NAMES`]). An explicit project path always wins.
    pub fn resolve(project: Option<&Path>, config: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir()?;
        match config {
            Some(config_path) => {
                let config_path = cwd.join(config_path);
                let path = match project {
                    Some(p) => cwd.join(p),
                    None => {
                        let dir = config_path.parent().unwrap_or(&cwd);
                        find_git_root(dir)?
                    }
                };
                Ok(Self::new(path, config_path))
            }
            None => {
                let path = match project {
                    Some(p) => cwd.join(p),
                    None => find_git_root(&cwd)?,
                };
                let config_path = locate_config(&path)?;
                Ok(Self::new(path, config_path))
            }
        }
    }
}

/// First existing config file under `project`.
pub fn locate_config(project: &Path) -> Result<PathBuf, ConfigError> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| project.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ConfigError::FileNotFound(format!(
                "none of {} in {}",
                CONFIG_FILE_NAMES.join(", "),
                project.display()
            ))
        })
}

/// Walk upwards from `start` to the first directory containing a `.git`
/// directory.
pub fn find_git_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let start = std::env::current_dir()?.join(start);
    let mut current = start.as_path();
    loop {
        let git_path = current.join(".git");
        match std::fs::metadata(&git_path) {
            Ok(meta) if meta.is_dir() => {
                debug!(root = %current.display(), "found git root");
                return Ok(current.to_path_buf());
            }
            Ok(_) => {
                return Err(ConfigError::ProjectNotFound(format!(
                    ".git found at {} but it is not a directory",
                    current.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::IoError(e)),
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => {
                return Err(ConfigError::ProjectNotFound(format!(
                    "'.git' directory not found in {} or any of its parent directories",
                    start.display()
                )));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream clone URL, or the name of a git remote of the project.
    pub upstream: String,

    /// Downstream (fork) clone URL, or the name of a git remote.
    pub downstream: String,

    /// Log pushes and PRs instead of performing them.
    #[serde(default)]
    pub dry_run: bool,

    /// Labels applied to every pull request opened.
    #[serde(default = "default_sync_labels")]
    pub sync_labels: Vec<String>,

    /// Files of downstream main laid over every synchronized branch.
    #[serde(default = "default_copy_from_midstream")]
    pub copy_from_midstream: Filters,

    /// Upstream files removed before the fork files are applied.
    #[serde(default = "default_delete_from_upstream")]
    pub delete_from_upstream: Filters,

    #[serde(default)]
    pub branches: Branches,

    #[serde(default)]
    pub tags: Tags,

    #[serde(default)]
    pub resync_releases: ResyncReleases,

    #[serde(default)]
    pub messages: Messages,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub remotes: RemoteNames,
}

fn default_sync_labels() -> Vec<String> {
    vec!["kind/sync-fork-to-upstream".into()]
}
fn default_copy_from_midstream() -> Filters {
    Filters::everything()
}
fn default_delete_from_upstream() -> Filters {
    Filters::new([".github/workflows/knative-*.y?ml"], Vec::<String>::new())
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branches {
    #[serde(default = "default_main")]
    pub main: String,

    #[serde(default = "default_release_next")]
    pub release_next: String,

    /// Prefix of the branches used to run CI and open PRs.
    #[serde(default = "default_check_pr_prefix")]
    pub check_pr_prefix: String,

    /// Skip the CI-trigger branch and the release-next PR.
    #[serde(default)]
    pub skip_check_pr: bool,

    #[serde(default)]
    pub release_templates: ReleaseTemplates,

    #[serde(default)]
    pub searches: Searches,
}

fn default_main() -> String {
    "main".into()
}
fn default_release_next() -> String {
    "release-next".into()
}
fn default_check_pr_prefix() -> String {
    "ci/".into()
}

impl Default for Branches {
    fn default() -> Self {
        Self {
            main: default_main(),
            release_next: default_release_next(),
            check_pr_prefix: default_check_pr_prefix(),
            skip_check_pr: false,
            release_templates: ReleaseTemplates::default(),
            searches: Searches::default(),
        }
    }
}

/// Branch-name templates with `{major}` / `{minor}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseTemplates {
    #[serde(default = "default_release_template")]
    pub upstream: String,
    #[serde(default = "default_release_template")]
    pub downstream: String,
}

fn default_release_template() -> String {
    "release-{major}.{minor}".into()
}

impl Default for ReleaseTemplates {
    fn default() -> Self {
        Self {
            upstream: default_release_template(),
            downstream: default_release_template(),
        }
    }
}

/// Regexes finding release branches; each must hold exactly two capture
/// groups (major, minor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Searches {
    #[serde(default = "default_release_search")]
    pub upstream_releases: String,
    #[serde(default = "default_release_search")]
    pub downstream_releases: String,
}

fn default_release_search() -> String {
    r"^release-(\d+)\.(\d+)$".into()
}

impl Default for Searches {
    fn default() -> Self {
        Self {
            upstream_releases: default_release_search(),
            downstream_releases: default_release_search(),
        }
    }
}

impl Searches {
    pub fn upstream_regex(&self) -> Result<Regex, ConfigError> {
        compile_search("branches.searches.upstream_releases", &self.upstream_releases)
    }

    pub fn downstream_regex(&self) -> Result<Regex, ConfigError> {
        compile_search("branches.searches.downstream_releases", &self.downstream_releases)
    }
}

fn compile_search(field: &str, pattern: &str) -> Result<Regex, ConfigError> {
    let re = Regex::new(pattern).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    // captures_len counts the implicit whole-match group.
    if re.captures_len() != 3 {
        return Err(ConfigError::invalid(
            field,
            format!(
                "expected exactly 2 capture groups, found {}",
                re.captures_len() - 1
            ),
        ));
    }
    Ok(re)
}

// ---------------------------------------------------------------------------
// Tags / resync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default = "default_true")]
    pub synchronize: bool,

    /// Glob of tag names pushed downstream, e.g. `v*`.
    #[serde(default = "default_ref_spec")]
    pub ref_spec: String,
}

fn default_true() -> bool {
    true
}
fn default_ref_spec() -> String {
    "v*".into()
}

impl Default for Tags {
    fn default() -> Self {
        Self {
            synchronize: true,
            ref_spec: default_ref_spec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncReleases {
    #[serde(default)]
    pub enabled: bool,

    /// Size of the trailing window of releases re-merged each run.
    #[serde(default = "default_number_of")]
    pub number_of: usize,
}

fn default_number_of() -> usize {
    6
}

impl Default for ResyncReleases {
    fn default() -> Self {
        Self {
            enabled: false,
            number_of: default_number_of(),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Commit messages and PR texts.
///
/// `trigger_ci` and `trigger_ci_body` accept `{release_branch}` (the
/// downstream branch being checked) and `{main_branch}` (the upstream branch
/// it follows).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messages {
    #[serde(default = "default_trigger_ci")]
    pub trigger_ci: String,
    #[serde(default = "default_trigger_ci_body")]
    pub trigger_ci_body: String,
    #[serde(default = "default_apply_fork_files")]
    pub apply_fork_files: String,
    #[serde(default = "default_images_generated")]
    pub images_generated: String,
    #[serde(default = "default_apply_patches")]
    pub apply_patches: String,
}

fn default_trigger_ci() -> String {
    ":robot: Synchronize branch `{release_branch}` to `upstream/{main_branch}`".into()
}
fn default_trigger_ci_body() -> String {
    "This automated PR is to make sure the forked project's `{release_branch}` branch \
     (forked upstream's `{main_branch}` branch) passes a CI."
        .into()
}
fn default_apply_fork_files() -> String {
    ":open_file_folder: Apply fork specific files".into()
}
fn default_images_generated() -> String {
    ":vhs: Images generated".into()
}
fn default_apply_patches() -> String {
    ":fire: Apply carried patches".into()
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            trigger_ci: default_trigger_ci(),
            trigger_ci_body: default_trigger_ci_body(),
            apply_fork_files: default_apply_fork_files(),
            images_generated: default_images_generated(),
            apply_patches: default_apply_patches(),
        }
    }
}

impl Messages {
    pub fn trigger_ci_title(&self, release_branch: &str, main_branch: &str) -> String {
        render_branches(&self.trigger_ci, release_branch, main_branch)
    }

    pub fn trigger_ci_body(&self, release_branch: &str, main_branch: &str) -> String {
        render_branches(&self.trigger_ci_body, release_branch, main_branch)
    }
}

fn render_branches(template: &str, release_branch: &str, main_branch: &str) -> String {
    template
        .replace("{release_branch}", release_branch)
        .replace("{main_branch}", main_branch)
}

// ---------------------------------------------------------------------------
// GitHub / generator / remotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API base. Derived from the downstream URL when unset.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Name of the environment variable holding the token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// `owner/name` of the downstream repository. Derived from the
    /// downstream URL when unset.
    #[serde(default)]
    pub repo: Option<String>,

    /// Resolved token (not serialized).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token_env: default_token_env(),
            repo: None,
            token: None,
        }
    }
}

/// External command regenerating derived artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub skip: bool,

    /// argv run in the project root; empty means nothing to generate.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Names of the git remotes the tool manages in the project repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNames {
    #[serde(default = "default_upstream_remote")]
    pub upstream: String,
    #[serde(default = "default_downstream_remote")]
    pub downstream: String,
}

fn default_upstream_remote() -> String {
    "upstream".into()
}
fn default_downstream_remote() -> String {
    "downstream".into()
}

impl Default for RemoteNames {
    fn default() -> Self {
        Self {
            upstream: default_upstream_remote(),
            downstream: default_downstream_remote(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading / validation
// ---------------------------------------------------------------------------

impl Config {
    /// A configuration with every default and the given remotes.
    pub fn new(upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
            dry_run: false,
            sync_labels: default_sync_labels(),
            copy_from_midstream: default_copy_from_midstream(),
            delete_from_upstream: default_delete_from_upstream(),
            branches: Branches::default(),
            tags: Tags::default(),
            resync_releases: ResyncReleases::default(),
            messages: Messages::default(),
            github: GitHubConfig::default(),
            generator: GeneratorConfig::default(),
            remotes: RemoteNames::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Render as TOML, e.g. for `downsync init`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve the GitHub token from the environment. A missing token is only
    /// a warning: dry runs and `skip_check_pr` setups never need it.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        Ok(())
    }

    /// Replace an `upstream` / `downstream` value that names a git remote of
    /// the project with that remote's URL.
    pub fn resolve_remotes<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (field, value) in [
            ("upstream", &mut self.upstream),
            ("downstream", &mut self.downstream),
        ] {
            if !looks_like_remote_name(value) {
                continue;
            }
            if let Some(url) = lookup(value) {
                debug!(field, remote = %value, url = %url, "resolved remote name");
                *value = url;
            }
        }
    }

    /// Validate required fields and derived values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("upstream", &self.upstream),
            ("downstream", &self.downstream),
            ("branches.main", &self.branches.main),
            ("branches.release_next", &self.branches.release_next),
            (
                "branches.release_templates.upstream",
                &self.branches.release_templates.upstream,
            ),
            (
                "branches.release_templates.downstream",
                &self.branches.release_templates.downstream,
            ),
            ("tags.ref_spec", &self.tags.ref_spec),
            ("messages.trigger_ci", &self.messages.trigger_ci),
            ("messages.trigger_ci_body", &self.messages.trigger_ci_body),
            ("messages.apply_fork_files", &self.messages.apply_fork_files),
            ("messages.images_generated", &self.messages.images_generated),
            ("messages.apply_patches", &self.messages.apply_patches),
            ("remotes.upstream", &self.remotes.upstream),
            ("remotes.downstream", &self.remotes.downstream),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        let prefix_needed = !self.branches.skip_check_pr || self.resync_releases.enabled;
        if prefix_needed && self.branches.check_pr_prefix.trim().is_empty() {
            return Err(ConfigError::invalid(
                "branches.check_pr_prefix",
                "must not be empty while CI check PRs or release resync are enabled",
            ));
        }
        if self.sync_labels.iter().any(|l| l.trim().is_empty()) {
            return Err(ConfigError::invalid("sync_labels", "labels must not be empty"));
        }
        if self.remotes.upstream == self.remotes.downstream {
            return Err(ConfigError::invalid(
                "remotes",
                "upstream and downstream remote names must differ",
            ));
        }

        self.branches.searches.upstream_regex()?;
        self.branches.searches.downstream_regex()?;

        for (field, filters) in [
            ("copy_from_midstream", &self.copy_from_midstream),
            ("delete_from_upstream", &self.delete_from_upstream),
        ] {
            filters.matcher().map_err(|e| match e {
                ConfigError::InvalidValue { detail, .. } => ConfigError::invalid(field, detail),
                other => other,
            })?;
        }

        if self.resync_releases.enabled && self.resync_releases.number_of == 0 {
            return Err(ConfigError::invalid(
                "resync_releases.number_of",
                "must be > 0 when resync is enabled",
            ));
        }
        if let Some(repo) = &self.github.repo {
            if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
                return Err(ConfigError::invalid(
                    "github.repo",
                    "GitHub repo must be in 'owner/repo' format",
                ));
            }
        }
        if !self.generator.skip && self.generator.command.first().is_some_and(|p| p.is_empty()) {
            return Err(ConfigError::invalid("generator.command", "program must not be empty"));
        }
        Ok(())
    }

    /// Load, resolve environment references and validate in one step.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// `owner/name` of the downstream repository on GitHub.
    pub fn github_repo(&self) -> Option<String> {
        self.github
            .repo
            .clone()
            .or_else(|| remote_url::repo_slug(&self.downstream))
    }

    /// REST API base for the downstream host.
    pub fn github_api_url(&self) -> String {
        self.github
            .api_url
            .clone()
            .or_else(|| remote_url::derive_api_url(&self.downstream))
            .unwrap_or_else(|| "https://api.github.com".into())
    }
}

fn looks_like_remote_name(value: &str) -> bool {
    !value.is_empty() && !value.contains(['/', ':', '\\', '@'])
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
