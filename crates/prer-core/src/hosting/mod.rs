//! Git hosting backends.
//!
//! Each backend opens a pull request (or merge request) from a deployment
//! branch into the target branch. The backend is chosen once at startup from
//! its configured name; an unknown name is a configuration error.

pub mod bitbucket;
pub mod github;
pub mod gitlab;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{PrerError, Result};

pub use bitbucket::{BitbucketConfig, BitbucketServer};
pub use github::{GitHubConfig, GitHubServer};
pub use gitlab::{GitLabConfig, GitLabServer};

/// User agent sent to every hosting API.
pub(crate) const USER_AGENT: &str = concat!("prer/", env!("CARGO_PKG_VERSION"));

/// Pull request creation on a hosting backend.
#[async_trait]
pub trait GitServer: Send + Sync {
    async fn create_pr(&self, from: &str, to: &str, title: &str, body: &str) -> Result<()>;
}

/// Supported hosting products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHost {
    GitHub,
    GitLab,
    Bitbucket,
}

impl FromStr for GitHost {
    type Err = PrerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(GitHost::GitHub),
            "gitlab" => Ok(GitHost::GitLab),
            "bitbucket" => Ok(GitHost::Bitbucket),
            other => Err(PrerError::UnknownGitHost(other.to_string())),
        }
    }
}

impl fmt::Display for GitHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GitHost::GitHub => "github",
            GitHost::GitLab => "gitlab",
            GitHost::Bitbucket => "bitbucket",
        };
        f.write_str(name)
    }
}

/// Settings for every backend; only the selected one is used.
#[derive(Debug, Clone, Default)]
pub struct HostingConfig {
    pub github: GitHubConfig,
    pub gitlab: GitLabConfig,
    pub bitbucket: BitbucketConfig,
}

/// Build the server for `host`.
pub fn connect(host: GitHost, config: &HostingConfig) -> Result<Arc<dyn GitServer>> {
    let server: Arc<dyn GitServer> = match host {
        GitHost::GitHub => Arc::new(GitHubServer::new(config.github.clone())?),
        GitHost::GitLab => Arc::new(GitLabServer::new(config.gitlab.clone())?),
        GitHost::Bitbucket => Arc::new(BitbucketServer::new(config.bitbucket.clone())?),
    };
    Ok(server)
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Result of a creation request the backend answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Created {
    New,
    AlreadyOpen,
}

/// Turn a response status into an outcome; `exists` recognises the
/// backend's "already open" answer.
pub(crate) fn outcome(
    from: &str,
    to: &str,
    status: StatusCode,
    body: &str,
    exists: impl Fn(StatusCode, &str) -> bool,
) -> Result<Created> {
    if status.is_success() {
        return Ok(Created::New);
    }
    if exists(status, body) {
        return Ok(Created::AlreadyOpen);
    }
    Err(PrerError::CreatePr {
        source_branch: from.to_string(),
        target_branch: to.to_string(),
        reason: format!("{status}: {}", body.trim()),
    })
}
