//! GitHub pull requests via the REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::info;

use super::{http_client, outcome, Created, GitServer};
use crate::error::{PrerError, Result};

/// GitHub connection settings.
#[derive(Debug, Clone, Default)]
pub struct GitHubConfig {
    /// Owner of the GitOps repository.
    pub repo_owner: String,
    /// Name of the GitOps repository.
    pub repo: String,
    /// Token with permission to open pull requests.
    pub access_token: String,
    /// GitHub Enterprise host; empty for github.com.
    pub enterprise_host: String,
    /// Full API base URL; overrides `enterprise_host` when set.
    pub api_url: Option<String>,
}

impl GitHubConfig {
    /// API base URL for the configured host.
    pub fn api_base(&self) -> String {
        if let Some(url) = &self.api_url {
            return url.trim_end_matches('/').to_string();
        }
        if self.enterprise_host.is_empty() {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.enterprise_host)
        }
    }
}

#[derive(Debug, Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

pub struct GitHubServer {
    config: GitHubConfig,
    http: reqwest::Client,
}

impl GitHubServer {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        Ok(Self {
            config,
            http: http_client()?,
        })
    }
}

#[async_trait]
impl GitServer for GitHubServer {
    async fn create_pr(&self, from: &str, to: &str, title: &str, body: &str) -> Result<()> {
        if self.config.repo_owner.is_empty() || self.config.repo.is_empty() {
            return Err(PrerError::InvalidConfig(
                "github_repo_owner and github_repo are required".to_string(),
            ));
        }

        let url = format!(
            "{}/repos/{}/{}/pulls",
            self.config.api_base(),
            self.config.repo_owner,
            self.config.repo
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .header("Accept", "application/vnd.github+json")
            .json(&NewPullRequest {
                title,
                head: from,
                base: to,
                body,
            })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match outcome(from, to, status, &text, |s, b| {
            s == StatusCode::UNPROCESSABLE_ENTITY && b.contains("A pull request already exists")
        })? {
            Created::New => info!(from, to, "created GitHub pull request"),
            Created::AlreadyOpen => info!(from, to, "GitHub pull request already exists"),
        }
        Ok(())
    }
}
