//! downsync command-line tool.
//!
//! Keeps a downstream fork in sync with its upstream project: mirrors new
//! release branches, rebuilds release-next, publishes tags and opens the
//! pull requests that run downstream CI. Also generates and validates
//! configuration files.

mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use downsync_core::config::{Config, Project};
use downsync_core::forge::{Forge, GitHubForge, UnconfiguredForge};
use downsync_core::generator::{CommandGenerator, Generator, NoopGenerator};
use downsync_core::git::Git2Repository;
use downsync_core::{CancelFlag, Operation, State, SyncStats};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// downsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "downsync",
    version,
    about = "Keep a downstream fork in sync with its upstream project"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults to `.downsync.toml` or
    /// `.github/downsync.toml` in the project.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error). Falls back to
    /// RUST_LOG, then info.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize the downstream fork with upstream.
    Sync {
        /// Project directory. Defaults to the git root above the config file
        /// or the current directory.
        project: Option<PathBuf>,

        /// Log what would be published instead of pushing or opening PRs.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = ".downsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate {
        /// Project directory.
        project: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync { project, dry_run } => {
            cmd_sync(cli.config.as_deref(), project.as_deref(), dry_run).await
        }
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate { project } => cmd_validate(cli.config.as_deref(), project.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn resolve_project(config: Option<&Path>, project: Option<&Path>) -> Result<Project> {
    Project::resolve(project, config).context("failed to locate project")
}

fn load_config(project: &Project) -> Result<Config> {
    let mut config =
        Config::load_from_file(&project.config_path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

/// Open the project repository, finish the configuration against it and
/// assemble the capabilities of a run.
fn prepare(project: Project, dry_run: bool, runtime: Handle) -> Result<State> {
    let mut config = load_config(&project)?;
    config.dry_run |= dry_run;

    let repo = Git2Repository::open(&project.path, config.github.token.clone())
        .context("failed to open project repository")?;
    config.resolve_remotes(|name| repo.remote_url(name));
    config.validate().context("configuration validation failed")?;

    let forge = build_forge(&config, runtime)?;
    let generator = build_generator(&config);
    Ok(State::new(config, project, Box::new(repo), forge, generator))
}

fn build_forge(config: &Config, runtime: Handle) -> Result<Box<dyn Forge>> {
    let Some(repo) = config.github_repo() else {
        warn!(downstream = %config.downstream, "cannot determine GitHub repository, pull requests will fail");
        return Ok(Box::new(UnconfiguredForge::UnknownRepository {
            url: config.downstream.clone(),
        }));
    };
    let Some(token) = config.github.token.clone() else {
        warn!(env = %config.github.token_env, "GitHub token not set, pull requests will fail");
        return Ok(Box::new(UnconfiguredForge::MissingToken {
            env: config.github.token_env.clone(),
        }));
    };
    let forge = GitHubForge::new(config.github_api_url(), token, repo, runtime)
        .context("failed to create GitHub client")?;
    Ok(Box::new(forge))
}

fn build_generator(config: &Config) -> Box<dyn Generator> {
    if config.generator.skip {
        return Box::new(NoopGenerator);
    }
    match CommandGenerator::new(&config.generator.command) {
        Some(generator) => Box::new(generator),
        None => Box::new(NoopGenerator),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(config: Option<&Path>, project: Option<&Path>, dry_run: bool) -> Result<()> {
    let project = resolve_project(config, project)?;
    info!(
        project = %project.path.display(),
        config = %project.config_path.display(),
        "synchronizing"
    );

    let cancel = CancelFlag::default();
    tokio::spawn(signals::cancel_on_shutdown(cancel.clone()));

    let runtime = Handle::current();
    let stats = tokio::task::spawn_blocking(move || -> Result<SyncStats> {
        let state = prepare(project, dry_run, runtime)?.with_cancel_flag(cancel);
        let stats = Operation::new(state).run()?;
        Ok(stats)
    })
    .await
    .context("sync task failed")??;

    print_summary(&stats);
    Ok(())
}

fn print_summary(stats: &SyncStats) {
    println!();
    println!("{}", style::header("Synchronization summary"));
    let list = |items: &[String]| {
        if items.is_empty() {
            style::dim("none")
        } else {
            items.join(", ")
        }
    };
    println!("  Mirrored releases : {}", list(&stats.releases_mirrored));
    println!("  Resynced releases : {}", list(&stats.releases_resynced));
    println!("  Pull requests     : {}", list(&stats.pull_requests));
    println!();
    println!("{}", style::success("Sync complete"));
}

const DEFAULT_CONFIG: &str = r#"# downsync configuration
# See documentation for all available options.

upstream = "https://github.com/knative/serving.git"
downstream = "https://github.com/openshift-knative/serving.git"
dry_run = false
sync_labels = ["kind/sync-fork-to-upstream"]

# Files copied from the downstream main branch onto every synced branch.
[copy_from_midstream]
include = ["**"]
exclude = []

# Upstream files removed before fork files are applied.
[delete_from_upstream]
include = [".github/workflows/knative-*.y?ml"]

[branches]
main = "main"
release_next = "release-next"
check_pr_prefix = "ci/"
skip_check_pr = false

[branches.release_templates]
upstream = "release-{major}.{minor}"
downstream = "release-{major}.{minor}"

[branches.searches]
upstream_releases = '^release-(\d+)\.(\d+)$'
downstream_releases = '^release-(\d+)\.(\d+)$'

[tags]
synchronize = true
ref_spec = "v*"

[resync_releases]
enabled = false
number_of = 6

[github]
token_env = "GITHUB_TOKEN"
# api_url = "https://api.github.com"
# repo = "openshift-knative/serving"

[generator]
skip = false
# command = ["make", "generate-release"]

[remotes]
upstream = "upstream"
downstream = "downstream"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the upstream and downstream repositories");
    println!("  2. Export the token variable (GITHUB_TOKEN by default)");
    println!("  3. Validate with: downsync validate --config {}", output.display());
    println!("  4. Try a run with: downsync sync --dry-run --config {}", output.display());
    Ok(())
}

fn cmd_validate(config: Option<&Path>, project: Option<&Path>) -> Result<()> {
    let project = resolve_project(config, project)?;
    println!("Validating configuration: {}", project.config_path.display());
    println!();

    let mut config =
        Config::load_from_file(&project.config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  {}", style::success("Environment variable references processed"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("All required fields are valid"));

    println!();
    println!("{}", style::header("Configuration summary"));
    println!("  Project       : {}", project.path.display());
    println!("  Upstream      : {}", config.upstream);
    println!("  Downstream    : {}", config.downstream);
    println!(
        "  GitHub repo   : {}",
        config.github_repo().unwrap_or_else(|| "unknown".into())
    );
    println!(
        "  GitHub token  : {}",
        if config.github.token.is_some() {
            "set".to_string()
        } else {
            style::warn(&format!("NOT SET (${})", config.github.token_env))
        }
    );
    println!("  Dry run       : {}", config.dry_run);
    println!(
        "  Resync        : {}",
        if config.resync_releases.enabled {
            format!("last {} releases", config.resync_releases.number_of)
        } else {
            "disabled".to_string()
        }
    );
    println!();
    println!("{}", style::success("Configuration is valid"));
    Ok(())
}
