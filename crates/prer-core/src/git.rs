//! Deployment repository operations backed by the system `git` binary.
//!
//! The promotion run owns a single sparse checkout of the GitOps repository.
//! Only the deployment subpath is materialised, and the deployment branches
//! are fetched alongside the base branch so existing train branches can be
//! reused.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{PrerError, Result};
use crate::process;

/// Where and how to obtain the deployment checkout.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Remote repository location.
    pub repo: String,
    /// Directory to clone into.
    pub dir: PathBuf,
    /// Optional local mirror used as `--reference`.
    pub mirror: Option<String>,
    /// Branch the deployment branches are based on.
    pub base_branch: String,
    /// Subpath holding the deployment manifests; empty means the whole tree.
    pub subpath: String,
    /// Prefix shared by every deployment branch.
    pub branch_prefix: String,
}

/// Mutable working tree of the deployment repository.
#[async_trait]
pub trait DeployRepo: Send + Sync {
    /// Root directory of the working tree.
    fn root(&self) -> &Path;

    /// Check out `branch`, creating it from `base` when it does not exist.
    ///
    /// Returns `true` when the branch was created fresh.
    async fn switch_to_branch(&mut self, branch: &str, base: &str) -> Result<bool>;

    /// Message of the commit at `HEAD`; empty when it cannot be read.
    async fn last_commit_message(&self) -> Result<String>;

    /// Reset `branch` to `base`, discarding its history.
    async fn recreate_branch(&mut self, branch: &str, base: &str) -> Result<()>;

    /// Stage `subpath` and commit it. Returns `false` when nothing changed.
    async fn commit(&mut self, message: &str, subpath: &str) -> Result<bool>;

    /// Force-push `branches` to the remote.
    async fn push(&self, branches: &[String]) -> Result<()>;
}

/// Produces the deployment checkout for a run.
#[async_trait]
pub trait RepoCloner: Send + Sync {
    async fn clone_or_checkout(&self, opts: &CloneOptions) -> Result<Box<dyn DeployRepo>>;
}

/// [`RepoCloner`] using the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct SystemGit;

#[async_trait]
impl RepoCloner for SystemGit {
    async fn clone_or_checkout(&self, opts: &CloneOptions) -> Result<Box<dyn DeployRepo>> {
        let repo = GitRepo::clone_or_checkout(opts).await?;
        Ok(Box::new(repo))
    }
}

/// A sparse checkout of the deployment repository.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    remote: String,
}

impl GitRepo {
    /// Open an existing checkout without cloning.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            remote: "origin".to_string(),
        }
    }

    /// Clone `opts.repo` into `opts.dir` and check out the base branch.
    ///
    /// A checkout already present in `opts.dir` is refreshed instead: it is
    /// fetched, reset onto the remote base branch and stripped of local
    /// deployment branches and untracked files.
    pub async fn clone_or_checkout(opts: &CloneOptions) -> Result<Self> {
        if opts.dir.join(".git").exists() {
            return Self::refresh(opts).await;
        }
        info!(repo = %opts.repo, dir = %opts.dir.display(), "cloning deployment repository");

        let dir = opts.dir.to_string_lossy().into_owned();
        let mut args = vec![
            "clone".to_string(),
            "--no-checkout".to_string(),
            "--single-branch".to_string(),
            "--branch".to_string(),
            opts.base_branch.clone(),
            "--filter=blob:none".to_string(),
            "--no-tags".to_string(),
        ];
        if let Some(mirror) = opts.mirror.as_deref().filter(|m| !m.is_empty()) {
            args.push("--reference".to_string());
            args.push(mirror.to_string());
        }
        args.push(opts.repo.clone());
        args.push(dir);
        git(&args, None).await?;

        let repo = Self::open(&opts.dir);
        repo.git(&["config", "--local", "core.sparsecheckout", "true"])
            .await?;
        let sparse = if opts.subpath.is_empty() {
            "/*\n".to_string()
        } else {
            format!("{}/\n", opts.subpath.trim_end_matches('/'))
        };
        let info_dir = opts.dir.join(".git").join("info");
        tokio::fs::create_dir_all(&info_dir).await?;
        tokio::fs::write(info_dir.join("sparse-checkout"), sparse).await?;

        let refspec = format!(
            "+refs/heads/{prefix}*:refs/remotes/{remote}/{prefix}*",
            prefix = opts.branch_prefix,
            remote = repo.remote
        );
        let fetch_key = format!("remote.{}.fetch", repo.remote);
        repo.git(&["config", "--add", fetch_key.as_str(), refspec.as_str()])
            .await?;
        repo.git(&[
            "fetch",
            "--force",
            "--filter=blob:none",
            "--no-tags",
            repo.remote.as_str(),
        ])
        .await?;
        repo.git(&["checkout", opts.base_branch.as_str()]).await?;

        Ok(repo)
    }

    async fn refresh(opts: &CloneOptions) -> Result<Self> {
        info!(dir = %opts.dir.display(), "reusing existing deployment checkout");
        let repo = Self::open(&opts.dir);
        let base = opts.base_branch.as_str();
        let upstream = format!("{}/{base}", repo.remote);

        repo.git(&[
            "fetch",
            "--force",
            "--prune",
            "--filter=blob:none",
            "--no-tags",
            repo.remote.as_str(),
        ])
        .await?;
        repo.git(&["checkout", "-f", base]).await?;
        repo.git(&["reset", "--hard", upstream.as_str()]).await?;
        repo.git(&["clean", "-fd"]).await?;

        // Leftover local deployment branches would shadow the fetched ones.
        let pattern = format!("refs/heads/{}", opts.branch_prefix);
        let local = repo
            .git(&["for-each-ref", "--format=%(refname:short)", pattern.as_str()])
            .await?;
        for branch in local.lines().map(str::trim).filter(|b| !b.is_empty()) {
            debug!(branch, "dropping stale local branch");
            repo.git(&["branch", "-D", branch]).await?;
        }
        Ok(repo)
    }

    /// Whether the working tree has no staged or unstaged changes.
    pub async fn is_clean(&self) -> Result<bool> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(status.trim().is_empty())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        git(args, Some(&self.dir)).await
    }
}

async fn git<S: AsRef<str>>(args: &[S], cwd: Option<&Path>) -> Result<String> {
    process::run("git", args, cwd).await.map_err(|e| match e {
        PrerError::CommandFailed {
            command, stderr, ..
        } => PrerError::Git(format!("{command}: {stderr}")),
        other => other,
    })
}

#[async_trait]
impl DeployRepo for GitRepo {
    fn root(&self) -> &Path {
        &self.dir
    }

    async fn switch_to_branch(&mut self, branch: &str, base: &str) -> Result<bool> {
        let out = process::output("git", &["checkout", branch], Some(&self.dir)).await?;
        if out.status.success() {
            debug!(branch, "checked out existing branch");
            return Ok(false);
        }
        self.git(&["branch", branch, base]).await?;
        self.git(&["checkout", branch]).await?;
        debug!(branch, base, "created branch");
        Ok(true)
    }

    async fn last_commit_message(&self) -> Result<String> {
        let out = process::output("git", &["log", "-1", "--pretty=%B"], Some(&self.dir)).await?;
        if !out.status.success() {
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn recreate_branch(&mut self, branch: &str, base: &str) -> Result<()> {
        self.git(&["checkout", base]).await?;
        self.git(&["branch", "-f", branch, base]).await?;
        self.git(&["checkout", branch]).await?;
        Ok(())
    }

    async fn commit(&mut self, message: &str, subpath: &str) -> Result<bool> {
        let pathspec = if subpath.is_empty() { "." } else { subpath };
        self.git(&["add", pathspec]).await?;
        if self.is_clean().await? {
            return Ok(false);
        }
        self.git(&["commit", "-a", "-m", message]).await?;
        Ok(true)
    }

    async fn push(&self, branches: &[String]) -> Result<()> {
        if branches.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "push".to_string(),
            self.remote.clone(),
            "-f".to_string(),
            "--set-upstream".to_string(),
        ];
        args.extend(branches.iter().cloned());
        git(&args, Some(&self.dir)).await?;
        Ok(())
    }
}
