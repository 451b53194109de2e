//! The Forge capability: pull-request creation on the hosting service.
//!
//! - [`github`]: GitHub REST implementation
//! - `mock`: recording implementation for tests (`test-support` feature)

pub mod github;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use serde::{Deserialize, Serialize};

use crate::errors::ForgeError;

pub use github::GitHubForge;

/// A pull request to open on the downstream repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRequest {
    pub title: String,
    pub body: String,
    /// Branch the changes go into.
    pub base: String,
    /// Branch holding the changes.
    pub head: String,
    /// Labels applied once the pull request exists.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A pull request as reported by the forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

/// Hosting-service operations. Calls block until the service answers.
pub trait Forge {
    /// Open a pull request from `head` into `base`. When one is already open
    /// for the same pair, implementations return it instead of failing.
    fn create_pr(&self, request: &PullRequestRequest) -> Result<PullRequest, ForgeError>;
}

/// Stand-in used when no forge could be configured (no token, or no GitHub
/// repository behind the downstream URL). Runs that never open a PR, such as
/// dry runs, work without one; anything else fails with the stored reason.
#[derive(Debug, Clone)]
pub enum UnconfiguredForge {
    MissingToken { env: String },
    UnknownRepository { url: String },
}

impl Forge for UnconfiguredForge {
    fn create_pr(&self, _request: &PullRequestRequest) -> Result<PullRequest, ForgeError> {
        match self {
            Self::MissingToken { env } => Err(ForgeError::AuthenticationFailed(format!(
                "no token found in ${}",
                env
            ))),
            Self::UnknownRepository { url } => Err(ForgeError::UnknownRepository(url.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_forge_reports_reason() {
        let request = PullRequestRequest {
            title: "t".into(),
            body: "b".into(),
            base: "release-next".into(),
            head: "ci/release-next".into(),
            labels: vec![],
        };
        let err = UnconfiguredForge::MissingToken {
            env: "GITHUB_TOKEN".into(),
        }
        .create_pr(&request)
        .unwrap_err();
        assert!(err.to_string().contains("$GITHUB_TOKEN"));

        let err = UnconfiguredForge::UnknownRepository {
            url: "/tmp/fork".into(),
        }
        .create_pr(&request)
        .unwrap_err();
        assert!(matches!(err, ForgeError::UnknownRepository(_)));
    }
}
