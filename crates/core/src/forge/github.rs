//! GitHub REST API forge.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use super::{Forge, PullRequest, PullRequestRequest};
use crate::errors::ForgeError;

/// GitHub forge bound to one `owner/name` repository.
///
/// The HTTP client is asynchronous; blocking calls are driven through the
/// runtime `Handle`, so `create_pr` must be called from a thread that is not
/// itself executing async tasks (e.g. inside `spawn_blocking`).
#[derive(Clone)]
pub struct GitHubForge {
    http: reqwest::Client,
    api_url: String,
    token: String,
    repo: String,
    runtime: Handle,
}

impl GitHubForge {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        repo: impl Into<String>,
        runtime: Handle,
    ) -> Result<Self, ForgeError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let repo = repo.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("downsync/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, repo = %repo, "created GitHubForge");
        Ok(Self {
            http,
            api_url,
            token: token.into(),
            repo,
            runtime,
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    async fn open_pull_request(&self, request: &PullRequestRequest) -> Result<PullRequest, ForgeError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, self.repo);
        let payload = serde_json::json!({
            "title": request.title,
            "body": request.body,
            "head": request.head,
            "base": request.base,
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await?;
            if body.contains("already exists") {
                info!("pull request already open, reusing it");
                return self.find_open_pull_request(request).await;
            }
            return Err(ForgeError::ApiError { status: 422, body });
        }
        let resp = check_response(resp).await?;
        let pr: PullRequest = resp.json().await?;
        info!(number = pr.number, url = %pr.html_url, "created pull request");
        Ok(pr)
    }

    async fn find_open_pull_request(&self, request: &PullRequestRequest) -> Result<PullRequest, ForgeError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, self.repo);
        let owner = self.repo.split('/').next().unwrap_or_default();
        let head = format!("{}:{}", owner, request.head);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("state", "open"),
                ("head", head.as_str()),
                ("base", request.base.as_str()),
            ])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let prs: Vec<PullRequest> = resp.json().await?;
        prs.into_iter().next().ok_or_else(|| ForgeError::ApiError {
            status: 422,
            body: format!("pull request for '{}' exists but is not open", head),
        })
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), ForgeError> {
        if labels.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/repos/{}/issues/{}/labels",
            self.api_url, self.repo, number
        );
        let payload = serde_json::json!({ "labels": labels });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await?;
        debug!(number, ?labels, "labelled pull request");
        Ok(())
    }
}

impl Forge for GitHubForge {
    #[instrument(skip(self, request), fields(repo = %self.repo, head = %request.head, base = %request.base))]
    fn create_pr(&self, request: &PullRequestRequest) -> Result<PullRequest, ForgeError> {
        self.runtime.block_on(async {
            let pr = self.open_pull_request(request).await?;
            self.add_labels(pr.number, &request.labels).await?;
            Ok(pr)
        })
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ForgeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let exhausted = header("x-ratelimit-remaining").as_deref() == Some("0");
    let reset = header("x-ratelimit-reset");
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status.as_u16(), exhausted, reset, body))
}

/// Map a failed response to an error. GitHub reports an exhausted primary
/// rate limit as 403 with `x-ratelimit-remaining: 0`.
fn classify(status: u16, rate_exhausted: bool, reset: Option<String>, body: String) -> ForgeError {
    match status {
        429 => ForgeError::RateLimited {
            reset_at: reset.unwrap_or_else(|| "unknown".into()),
        },
        403 if rate_exhausted => ForgeError::RateLimited {
            reset_at: reset.unwrap_or_else(|| "unknown".into()),
        },
        401 | 403 => ForgeError::AuthenticationFailed(format!("HTTP {}", status)),
        _ => ForgeError::ApiError { status, body },
    }
}
