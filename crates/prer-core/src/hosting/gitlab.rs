//! GitLab merge requests via the v4 API.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::info;

use super::{http_client, outcome, Created, GitServer};
use crate::error::{PrerError, Result};

/// GitLab connection settings.
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    /// Base URL of the GitLab instance.
    pub host: String,
    /// Project path, e.g. `group/gitops`.
    pub repo: String,
    /// Personal or project access token.
    pub access_token: String,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            host: "https://gitlab.com".to_string(),
            repo: String::new(),
            access_token: String::new(),
        }
    }
}

impl GitLabConfig {
    /// `{host}/api/v4/projects/{project}/merge_requests` with the project
    /// path encoded as a single segment.
    pub fn merge_requests_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.host.trim_end_matches('/'))
            .map_err(|e| PrerError::InvalidConfig(format!("gitlab_host {}: {e}", self.host)))?;
        url.path_segments_mut()
            .map_err(|_| PrerError::InvalidConfig(format!("gitlab_host {} cannot be a base", self.host)))?
            .pop_if_empty()
            .extend(["api", "v4", "projects", self.repo.as_str(), "merge_requests"]);
        Ok(url)
    }
}

#[derive(Debug, Serialize)]
struct NewMergeRequest<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
}

pub struct GitLabServer {
    config: GitLabConfig,
    http: reqwest::Client,
}

impl GitLabServer {
    pub fn new(config: GitLabConfig) -> Result<Self> {
        Ok(Self {
            config,
            http: http_client()?,
        })
    }
}

#[async_trait]
impl GitServer for GitLabServer {
    async fn create_pr(&self, from: &str, to: &str, title: &str, body: &str) -> Result<()> {
        if self.config.repo.is_empty() {
            return Err(PrerError::InvalidConfig("gitlab_repo is required".to_string()));
        }

        let response = self
            .http
            .post(self.config.merge_requests_url()?)
            .header("PRIVATE-TOKEN", &self.config.access_token)
            .json(&NewMergeRequest {
                source_branch: from,
                target_branch: to,
                title,
                description: body,
            })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match outcome(from, to, status, &text, |s, _| s == StatusCode::CONFLICT)? {
            Created::New => info!(from, to, "created GitLab merge request"),
            Created::AlreadyOpen => info!(from, to, "GitLab merge request already exists"),
        }
        Ok(())
    }
}
