//! Run configuration.
//!
//! Built once at process start and shared read-only by every phase.

use std::path::{Path, PathBuf};

use crate::deps::{self, DependencyFilter};
use crate::error::{PrerError, Result};
use crate::git::CloneOptions;
use crate::hosting::{GitHost, HostingConfig};
use crate::push::PushTask;
use crate::train::{self, ReleaseTrains};

#[derive(Debug, Clone)]
pub struct PrerConfig {
    /// Only gitops targets whose `release_branch_prefix` matches are promoted.
    pub release_branch: String,
    /// Build tool binary, relative to `workspace` or on `PATH`.
    pub bazel_cmd: String,
    /// Build workspace root.
    pub workspace: PathBuf,
    /// GitOps repository location.
    pub git_repo: String,
    pub git_mirror: Option<String>,
    /// Subpath of the GitOps repository holding the manifests.
    pub gitops_path: String,
    /// Parent of the temporary checkout.
    pub gitops_tmpdir: PathBuf,
    /// Fixed checkout directory; a temporary one is used when unset.
    pub gitops_dir: Option<PathBuf>,
    /// Target pattern scanned for gitops rules.
    pub target: String,
    pub push_parallelism: usize,
    /// Base of every deployment branch and target of every PR.
    pub pr_into: String,
    pub pr_title: String,
    pub pr_body: String,
    /// Source branch recorded in commit messages.
    pub branch_name: String,
    /// Source commit recorded in commit messages.
    pub git_commit: String,
    pub deploy_branch_prefix: String,
    pub deployment_branch_suffix: String,
    pub git_host: GitHost,
    pub hosting: HostingConfig,
    pub dependency_filters: Vec<DependencyFilter>,
    /// Pre-resolved push commands; bypasses the dependency query.
    pub resolved_pushes: Vec<PushTask>,
    /// Explicit trains; bypasses train discovery.
    pub resolved_trains: Option<ReleaseTrains>,
    /// Commit locally but skip pushing branches and opening PRs.
    pub dry_run: bool,
}

impl Default for PrerConfig {
    fn default() -> Self {
        Self {
            release_branch: "master".to_string(),
            bazel_cmd: "tools/bazel".to_string(),
            workspace: PathBuf::from("."),
            git_repo: String::new(),
            git_mirror: None,
            gitops_path: "cloud".to_string(),
            gitops_tmpdir: std::env::temp_dir(),
            gitops_dir: None,
            target: "//... except //experimental/...".to_string(),
            push_parallelism: 1,
            pr_into: "master".to_string(),
            pr_title: String::new(),
            pr_body: String::new(),
            branch_name: "unknown".to_string(),
            git_commit: "unknown".to_string(),
            deploy_branch_prefix: "deploy/".to_string(),
            deployment_branch_suffix: String::new(),
            git_host: GitHost::Bitbucket,
            hosting: HostingConfig::default(),
            dependency_filters: deps::filters_from_flags::<&str>(&[], &[], &[]),
            resolved_pushes: Vec::new(),
            resolved_trains: None,
            dry_run: false,
        }
    }
}

impl PrerConfig {
    /// Set explicit trains from `train:command` pairs. No pairs keeps discovery.
    pub fn with_resolved_binaries<S: AsRef<str>>(mut self, pairs: &[S]) -> Result<Self> {
        self.resolved_trains = if pairs.is_empty() {
            None
        } else {
            Some(train::from_resolved_binaries(pairs)?)
        };
        Ok(self)
    }

    /// Set pre-resolved push commands.
    pub fn with_resolved_pushes<S: AsRef<str>>(mut self, commands: &[S]) -> Result<Self> {
        self.resolved_pushes = commands
            .iter()
            .map(|c| PushTask::resolved(c.as_ref()))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// Anchor every relative location at the workspace.
    ///
    /// Build tool subprocesses run inside the workspace while git runs from
    /// the checkout, so a checkout path that is relative to the process
    /// directory would render and commit in two different places.
    pub fn with_absolute_paths(mut self) -> Result<Self> {
        if self.workspace.is_relative() {
            self.workspace = std::env::current_dir()?.join(&self.workspace);
        }
        let ws = self.workspace.clone();
        self.gitops_tmpdir = ws.join(&self.gitops_tmpdir);
        self.gitops_dir = self.gitops_dir.map(|dir| ws.join(dir));
        self.git_repo = anchor_local(&ws, &self.git_repo);
        self.git_mirror = self.git_mirror.map(|m| anchor_local(&ws, &m));
        Ok(self)
    }

    /// Reject settings that would only fail halfway through a run.
    pub fn validate(&self) -> Result<()> {
        if self.push_parallelism == 0 {
            return Err(PrerError::InvalidConfig(
                "push_parallelism must be at least 1".to_string(),
            ));
        }
        if self.pr_into.is_empty() {
            return Err(PrerError::InvalidConfig(
                "gitops_pr_into must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Deployment branch of `train`.
    pub fn branch_for(&self, train: &str) -> String {
        train::branch_name(&self.deploy_branch_prefix, train, &self.deployment_branch_suffix)
    }

    /// PR title for `branch`, falling back to a generated one.
    pub fn pr_title_for(&self, branch: &str) -> String {
        if self.pr_title.is_empty() {
            format!("GitOps deployment {branch}")
        } else {
            self.pr_title.clone()
        }
    }

    /// PR body for `branch`, falling back to the branch name.
    pub fn pr_body_for(&self, branch: &str) -> String {
        if self.pr_body.is_empty() {
            branch.to_string()
        } else {
            self.pr_body.clone()
        }
    }

    /// Clone options for a checkout in `dir`.
    pub fn clone_options(&self, dir: PathBuf) -> CloneOptions {
        CloneOptions {
            repo: self.git_repo.clone(),
            dir,
            mirror: self.git_mirror.clone().filter(|m| !m.is_empty()),
            base_branch: self.pr_into.clone(),
            subpath: self.gitops_path.clone(),
            branch_prefix: self.deploy_branch_prefix.clone(),
        }
    }
}

/// Join a relative local repository path onto `ws`. URLs and scp-style
/// `host:path` locations are returned as given.
fn anchor_local(ws: &Path, location: &str) -> String {
    if location.is_empty() || location.contains("://") {
        return location.to_string();
    }
    if let Some((host, _)) = location.split_once(':') {
        if !host.contains('/') {
            return location.to_string();
        }
    }
    if Path::new(location).is_absolute() {
        return location.to_string();
    }
    ws.join(location).to_string_lossy().into_owned()
}
