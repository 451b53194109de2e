//! Mock forge for deterministic testing.
//!
//! Stores requests in memory and can be configured to fail PR creation.

use std::sync::{Arc, Mutex};

use super::{Forge, PullRequest, PullRequestRequest};
use crate::errors::ForgeError;

/// Mock forge. Thread-safe and shared across clones.
#[derive(Debug, Clone, Default)]
pub struct MockForge {
    inner: Arc<Mutex<MockForgeInner>>,
}

#[derive(Debug, Default)]
struct MockForgeInner {
    requests: Vec<PullRequestRequest>,
    /// HTTP status to fail `create_pr` with.
    fail_status: Option<u16>,
}

impl MockForge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `create_pr` with an API error carrying `status`.
    pub fn failing(status: u16) -> Self {
        let forge = Self::new();
        forge.inner.lock().unwrap().fail_status = Some(status);
        forge
    }

    /// Every request received, including failed ones.
    pub fn requests(&self) -> Vec<PullRequestRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn pr_count(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }
}

impl Forge for MockForge {
    fn create_pr(&self, request: &PullRequestRequest) -> Result<PullRequest, ForgeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.clone());
        if let Some(status) = inner.fail_status {
            return Err(ForgeError::ApiError {
                status,
                body: "mock failure".into(),
            });
        }
        let number = inner.requests.len() as u64;
        Ok(PullRequest {
            number,
            html_url: format!("https://github.com/mock/repo/pull/{}", number),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PullRequestRequest {
        PullRequestRequest {
            title: "title".into(),
            body: "body".into(),
            base: "release-1.0".into(),
            head: "ci/release-1.0".into(),
            labels: vec![],
        }
    }

    #[test]
    fn test_numbers_increase() {
        let forge = MockForge::new();
        assert_eq!(forge.create_pr(&request()).unwrap().number, 1);
        assert_eq!(forge.create_pr(&request()).unwrap().number, 2);
        assert_eq!(forge.pr_count(), 2);
    }

    #[test]
    fn test_failing_still_records() {
        let forge = MockForge::failing(502);
        assert!(matches!(
            forge.create_pr(&request()),
            Err(ForgeError::ApiError { status: 502, .. })
        ));
        assert_eq!(forge.requests(), vec![request()]);
    }
}
