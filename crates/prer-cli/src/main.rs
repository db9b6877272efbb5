//! create-gitops-prs
//!
//! Renders every gitops target of a release branch into its release train's
//! deployment branch, pushes the images those trains depend on, and opens a
//! deployment pull request per changed branch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use prer_core::{
    connect, filters_from_flags, Bazel, BazelTaskRunner, BitbucketConfig, GitHost, GitHubConfig,
    GitLabConfig, HostingConfig, PrerConfig, PromoteOutcome, Promoter, PushExecutor, SystemGit,
};

#[derive(Parser, Debug)]
#[command(name = "create-gitops-prs")]
#[command(author = "Stevedores Org")]
#[command(version = prer_core::VERSION)]
#[command(about = "Promote rendered deployments into release train branches and open PRs", long_about = None)]
struct Cli {
    /// Filter gitops targets by release branch
    #[arg(long = "release_branch", default_value = "master")]
    release_branch: String,

    /// Build tool binary to use
    #[arg(long = "bazel_cmd", default_value = "tools/bazel")]
    bazel_cmd: String,

    /// Path to the workspace root (default: current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// GitOps repository location
    #[arg(long = "git_repo", default_value = "")]
    git_repo: String,

    /// Local mirror of the GitOps repository used as clone reference
    #[arg(long = "git_mirror")]
    git_mirror: Option<String>,

    /// Location of the deployment files inside the repository
    #[arg(long = "gitops_path", default_value = "cloud")]
    gitops_path: String,

    /// Parent directory of the temporary checkout (default: system temp)
    #[arg(long = "gitops_tmpdir")]
    gitops_tmpdir: Option<PathBuf>,

    /// Use this directory for the checkout instead of a temporary one
    #[arg(long = "gitopsdir")]
    gitopsdir: Option<PathBuf>,

    /// Target pattern to scan
    #[arg(long, default_value = "//... except //experimental/...")]
    target: String,

    /// Number of image pushes to perform concurrently
    #[arg(long = "push_parallelism", default_value_t = 1)]
    push_parallelism: usize,

    /// Base branch of every deployment branch and target of every PR
    #[arg(long = "gitops_pr_into", default_value = "master")]
    gitops_pr_into: String,

    /// Title of deployment PRs (default: "GitOps deployment <branch>")
    #[arg(long = "gitops_pr_title", default_value = "")]
    gitops_pr_title: String,

    /// Body of deployment PRs (default: the branch name)
    #[arg(long = "gitops_pr_body", default_value = "")]
    gitops_pr_body: String,

    /// Branch name recorded in commit messages
    #[arg(long = "branch_name", default_value = "unknown")]
    branch_name: String,

    /// Commit recorded in commit messages
    #[arg(long = "git_commit", default_value = "unknown")]
    git_commit: String,

    /// Prefix of every deployment branch name
    #[arg(long = "deploy_branch_prefix", default_value = "deploy/")]
    deploy_branch_prefix: String,

    /// Suffix of every deployment branch name
    #[arg(long = "deployment_branch_suffix", default_value = "")]
    deployment_branch_suffix: String,

    /// Hosting API: bitbucket, github or gitlab
    #[arg(long = "git_server", default_value = "bitbucket")]
    git_server: String,

    /// Dependency kind to push (repeatable; default k8s_container_push and push_oci)
    #[arg(long = "gitops_dependencies_kind")]
    gitops_dependencies_kind: Vec<String>,

    /// Dependency name pattern to push (repeatable)
    #[arg(long = "gitops_dependencies_name")]
    gitops_dependencies_name: Vec<String>,

    /// Dependency attribute to push, as attribute[=value] (repeatable)
    #[arg(long = "gitops_dependencies_attr")]
    gitops_dependencies_attr: Vec<String>,

    /// Pre-resolved push command (repeatable); skips the dependency query
    #[arg(long = "resolved_push")]
    resolved_push: Vec<String>,

    /// Pre-resolved gitops binary as train:command (repeatable); skips discovery
    #[arg(long = "resolved_binary")]
    resolved_binary: Vec<String>,

    /// Commit locally but do not push branches or create PRs
    #[arg(long = "dry_run")]
    dry_run: bool,

    /// GitHub repository owner
    #[arg(long = "github_repo_owner", env = "GITHUB_REPO_OWNER", default_value = "")]
    github_repo_owner: String,

    /// GitHub repository name
    #[arg(long = "github_repo", env = "GITHUB_REPO", default_value = "")]
    github_repo: String,

    /// GitHub access token
    #[arg(long = "github_access_token", env = "GITHUB_TOKEN", default_value = "", hide_env_values = true)]
    github_access_token: String,

    /// GitHub Enterprise host (empty for github.com)
    #[arg(long = "github_enterprise_host", env = "GITHUB_ENTERPRISE_HOST", default_value = "")]
    github_enterprise_host: String,

    /// GitLab base URL
    #[arg(long = "gitlab_host", env = "GITLAB_HOST", default_value = "https://gitlab.com")]
    gitlab_host: String,

    /// GitLab project path, e.g. group/gitops
    #[arg(long = "gitlab_repo", env = "GITLAB_REPO", default_value = "")]
    gitlab_repo: String,

    /// GitLab access token
    #[arg(long = "gitlab_access_token", env = "GITLAB_TOKEN", default_value = "", hide_env_values = true)]
    gitlab_access_token: String,

    /// Bitbucket Server pull request endpoint
    #[arg(long = "bitbucket_api_pr_endpoint", env = "BITBUCKET_API_PR_ENDPOINT", default_value = "")]
    bitbucket_api_pr_endpoint: String,

    /// Bitbucket user
    #[arg(long = "bitbucket_user", env = "BITBUCKET_USER", default_value = "")]
    bitbucket_user: String,

    /// Bitbucket password
    #[arg(long = "bitbucket_password", env = "BITBUCKET_PASSWORD", default_value = "", hide_env_values = true)]
    bitbucket_password: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long = "json-logs")]
    json_logs: bool,
}

impl Cli {
    /// Resolve every flag into the run configuration. Fails before any work
    /// starts on an unknown git server or malformed resolved values.
    fn into_config(self) -> Result<PrerConfig> {
        let git_host = self
            .git_server
            .parse::<GitHost>()
            .context("invalid --git_server")?;
        let dependency_filters = filters_from_flags(
            &self.gitops_dependencies_kind,
            &self.gitops_dependencies_name,
            &self.gitops_dependencies_attr,
        );

        let config = PrerConfig {
            release_branch: self.release_branch,
            bazel_cmd: self.bazel_cmd,
            workspace: self.workspace.unwrap_or_else(|| PathBuf::from(".")),
            git_repo: self.git_repo,
            git_mirror: self.git_mirror,
            gitops_path: self.gitops_path,
            gitops_tmpdir: self.gitops_tmpdir.unwrap_or_else(std::env::temp_dir),
            gitops_dir: self.gitopsdir,
            target: self.target,
            push_parallelism: self.push_parallelism,
            pr_into: self.gitops_pr_into,
            pr_title: self.gitops_pr_title,
            pr_body: self.gitops_pr_body,
            branch_name: self.branch_name,
            git_commit: self.git_commit,
            deploy_branch_prefix: self.deploy_branch_prefix,
            deployment_branch_suffix: self.deployment_branch_suffix,
            git_host,
            hosting: HostingConfig {
                github: GitHubConfig {
                    repo_owner: self.github_repo_owner,
                    repo: self.github_repo,
                    access_token: self.github_access_token,
                    enterprise_host: self.github_enterprise_host,
                    api_url: None,
                },
                gitlab: GitLabConfig {
                    host: self.gitlab_host,
                    repo: self.gitlab_repo,
                    access_token: self.gitlab_access_token,
                },
                bitbucket: BitbucketConfig {
                    api_pr_endpoint: self.bitbucket_api_pr_endpoint,
                    user: self.bitbucket_user,
                    password: self.bitbucket_password,
                },
            },
            dependency_filters,
            dry_run: self.dry_run,
            ..PrerConfig::default()
        }
        .with_resolved_binaries(&self.resolved_binary)
        .context("invalid --resolved_binary")?
        .with_resolved_pushes(&self.resolved_push)
        .context("invalid --resolved_push")?
        .with_absolute_paths()
        .context("cannot resolve the workspace directory")?;

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

async fn run(config: PrerConfig) -> Result<PromoteOutcome> {
    let server = connect(config.git_host, &config.hosting)
        .with_context(|| format!("Failed to set up {} client", config.git_host))?;
    let bazel = Bazel::new(config.bazel_cmd.clone(), config.workspace.clone());
    let pushes = PushExecutor::new(
        Arc::new(BazelTaskRunner::new(bazel.clone())),
        config.push_parallelism,
    );

    let promoter = Promoter::new(
        Arc::new(config),
        Arc::new(bazel),
        Arc::new(SystemGit),
        pushes,
        server,
    );
    promoter.run().await.context("GitOps promotion failed")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    prer_core::init_tracing(cli.json_logs, level);

    let result = match cli.into_config() {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(PromoteOutcome::Promoted(result)) => {
            info!(branches = ?result.updated_branches, "promotion complete");
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("create-gitops-prs: {e:#}");
            std::process::exit(1);
        }
    }
}
