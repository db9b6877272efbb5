//! Bitbucket Server pull requests.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::info;

use super::{http_client, outcome, Created, GitServer};
use crate::error::{PrerError, Result};

/// Bitbucket Server connection settings.
#[derive(Debug, Clone, Default)]
pub struct BitbucketConfig {
    /// Full pull-request endpoint, e.g.
    /// `https://bitbucket.acme.io/rest/api/1.0/projects/OPS/repos/gitops/pull-requests`.
    pub api_pr_endpoint: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct Ref {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewPullRequest<'a> {
    title: &'a str,
    description: &'a str,
    state: &'static str,
    open: bool,
    closed: bool,
    from_ref: Ref,
    to_ref: Ref,
    locked: bool,
}

impl<'a> NewPullRequest<'a> {
    fn new(from: &str, to: &str, title: &'a str, description: &'a str) -> Self {
        Self {
            title,
            description,
            state: "OPEN",
            open: true,
            closed: false,
            from_ref: Ref {
                id: format!("refs/heads/{from}"),
            },
            to_ref: Ref {
                id: format!("refs/heads/{to}"),
            },
            locked: false,
        }
    }
}

pub struct BitbucketServer {
    config: BitbucketConfig,
    http: reqwest::Client,
}

impl BitbucketServer {
    pub fn new(config: BitbucketConfig) -> Result<Self> {
        Ok(Self {
            config,
            http: http_client()?,
        })
    }
}

#[async_trait]
impl GitServer for BitbucketServer {
    async fn create_pr(&self, from: &str, to: &str, title: &str, body: &str) -> Result<()> {
        if self.config.api_pr_endpoint.is_empty() {
            return Err(PrerError::InvalidConfig(
                "bitbucket_api_pr_endpoint is required".to_string(),
            ));
        }

        let response = self
            .http
            .post(&self.config.api_pr_endpoint)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&NewPullRequest::new(from, to, title, body))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match outcome(from, to, status, &text, |s, _| s == StatusCode::CONFLICT)? {
            Created::New => info!(from, to, "created Bitbucket pull request"),
            Created::AlreadyOpen => info!(from, to, "Bitbucket pull request already exists"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let value = serde_json::to_value(NewPullRequest::new("deploy/a", "master", "t", "d")).unwrap();
        assert_eq!(value["fromRef"]["id"], "refs/heads/deploy/a");
        assert_eq!(value["toRef"]["id"], "refs/heads/master");
        assert_eq!(value["state"], "OPEN");
        assert_eq!(value["open"], true);
        assert_eq!(value["locked"], false);
    }

    #[tokio::test]
    async fn test_create_pr_uses_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        // "ci:secret" in base64
        let mock = server
            .mock("POST", "/rest/api/1.0/projects/OPS/repos/gitops/pull-requests")
            .match_header("authorization", "Basic Y2k6c2VjcmV0")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "title": "GitOps deployment deploy/a",
                "fromRef": {"id": "refs/heads/deploy/a"},
            })))
            .with_status(201)
            .create_async()
            .await;

        let bb = BitbucketServer::new(BitbucketConfig {
            api_pr_endpoint: format!("{}/rest/api/1.0/projects/OPS/repos/gitops/pull-requests", server.url()),
            user: "ci".to_string(),
            password: "secret".to_string(),
        })
        .unwrap();
        bb.create_pr("deploy/a", "master", "GitOps deployment deploy/a", "deploy/a")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/prs")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let bb = BitbucketServer::new(BitbucketConfig {
            api_pr_endpoint: format!("{}/prs", server.url()),
            user: "ci".to_string(),
            password: "secret".to_string(),
        })
        .unwrap();
        let err = bb.create_pr("deploy/a", "master", "t", "d").await.unwrap_err();
        assert!(matches!(err, PrerError::CreatePr { .. }));
    }
}
