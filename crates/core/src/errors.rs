//! Error types for the downsync core library.
//!
//! Each capability has its own error type derived with `thiserror`, and the
//! orchestrator-level [`SyncError`] wraps them so that callers always see a
//! single top-level cause with the original error chained underneath.

use std::error::Error as StdError;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// The project directory could not be resolved.
    #[error("project root not found: {0}")]
    ProjectNotFound(String),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository errors
// ---------------------------------------------------------------------------

/// Errors from the Repository capability (local git2 operations and
/// fetch/push against remotes).
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for '{ref_name}': {detail}")]
    PushRejected { ref_name: String, detail: String },

    /// Merge stopped on conflicting paths.
    #[error("git merge of '{branch}' conflicts in: {}", .paths.join(", "))]
    MergeConflict { branch: String, paths: Vec<String> },

    /// Failed to apply a patch file.
    #[error("git apply of '{path}' failed: {detail}")]
    ApplyFailed { path: String, detail: String },

    /// No credentials could be produced for a remote.
    #[error("no credentials available for '{0}'")]
    Authentication(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Forge errors
// ---------------------------------------------------------------------------

/// Errors from the Forge capability (GitHub REST API).
#[derive(Debug, Error)]
pub enum ForgeError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The `owner/name` slug could not be derived.
    #[error("cannot determine GitHub repository from '{0}'")]
    UnknownRepository(String),
}

// ---------------------------------------------------------------------------
// Generator errors
// ---------------------------------------------------------------------------

/// Errors from the Generator capability.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The generator command exited with a non-zero status.
    #[error("generator '{program}' failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    /// The generator command could not be spawned.
    #[error("generator I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// A failed call into the Repository or Forge capability.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Forge(#[from] ForgeError),
}

/// Errors produced by the sync orchestrator.
///
/// "Nothing changed" is deliberately absent: merges and commits report it
/// through [`MergeOutcome::UpToDate`](crate::git::MergeOutcome) and
/// [`CommitOutcome::NothingToCommit`](crate::git::CommitOutcome).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration failed validation before any stage ran.
    #[error("configuration is invalid")]
    ConfigurationInvalid(#[from] ConfigError),

    /// A Repository or Forge call failed.
    #[error("remote operation failed")]
    RemoteOperationFailed(#[from] RemoteError),

    /// Derived artifacts could not be regenerated.
    #[error("artifact generation failed")]
    Generator(#[from] GeneratorError),

    /// A local filesystem operation on the working tree failed.
    #[error("{context}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Stage-level wrapper around the root cause.
    #[error("sync failed in {stage}")]
    SyncFailed {
        stage: String,
        #[source]
        source: Box<SyncError>,
    },

    /// Several independent failures; the first one is the primary cause.
    #[error("{}", render_joined(.0))]
    Joined(Vec<SyncError>),

    /// Cancellation was requested between two steps.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Wrap `self` as a failure of `stage`, unless it already carries a stage.
    pub fn in_stage(self, stage: &str) -> Self {
        if self.has_stage() {
            return self;
        }
        Self::SyncFailed {
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    fn has_stage(&self) -> bool {
        match self {
            Self::SyncFailed { .. } | Self::Cancelled => true,
            Self::Joined(errors) => errors.first().is_some_and(Self::has_stage),
            _ => false,
        }
    }

    pub(crate) fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Workspace {
            context: context.into(),
            source,
        }
    }

    /// Append `other` to `self`, keeping `self` as the primary cause.
    pub fn join(self, other: SyncError) -> Self {
        let mut errors = match self {
            Self::Joined(errors) => errors,
            primary => vec![primary],
        };
        match other {
            Self::Joined(more) => errors.extend(more),
            other => errors.push(other),
        }
        Self::Joined(errors)
    }

    /// The individual failures carried by this error.
    pub fn causes(&self) -> Vec<&SyncError> {
        match self {
            Self::Joined(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }

    /// Whether any failure in the (possibly joined) error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.causes()
            .iter()
            .any(|e| matches!(e, SyncError::Cancelled))
    }
}

impl From<RepositoryError> for SyncError {
    fn from(err: RepositoryError) -> Self {
        Self::RemoteOperationFailed(RemoteError::Repository(err))
    }
}

impl From<ForgeError> for SyncError {
    fn from(err: ForgeError) -> Self {
        Self::RemoteOperationFailed(RemoteError::Forge(err))
    }
}

/// Combine two results; when both failed, the second error is joined onto
/// the first.
pub fn join_results(
    first: Result<(), SyncError>,
    second: Result<(), SyncError>,
) -> Result<(), SyncError> {
    match (first, second) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(primary), Err(other)) => Err(primary.join(other)),
    }
}

/// Render an error together with its whole `source()` chain on one line.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

fn render_joined(errors: &[SyncError]) -> String {
    errors
        .iter()
        .map(|e| error_chain(e))
        .collect::<Vec<_>>()
        .join("\n")
}
