//! In-memory fakes for the external seams (testing only)
//!
//! Provides `MemoryBuildGraph`, `MemoryCloner`/`MemoryRepo`,
//! `MemoryGitServer` and `RecordingRunner` so a whole promotion can run
//! without a build tool, a git binary or a hosting API.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::bazel::BuildGraph;
use crate::error::{PrerError, Result};
use crate::git::{CloneOptions, DeployRepo, RepoCloner};
use crate::hosting::GitServer;
use crate::push::{PushTask, TaskRunner};
use crate::query::TargetRecord;

// ---------------------------------------------------------------------------
// MemoryBuildGraph
// ---------------------------------------------------------------------------

/// Build graph answering queries from a FIFO of canned responses.
///
/// Once the queue is empty every query returns no targets.
#[derive(Debug, Default)]
pub struct MemoryBuildGraph {
    responses: Mutex<VecDeque<Vec<TargetRecord>>>,
    queries: Mutex<Vec<String>>,
    renders: Mutex<Vec<(String, PathBuf)>>,
    fail_render: Option<String>,
}

impl MemoryBuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next query.
    pub fn respond(self, records: Vec<TargetRecord>) -> Self {
        self.responses.lock().unwrap().push_back(records);
        self
    }

    /// Make rendering `target` fail.
    pub fn fail_render_of(mut self, target: impl Into<String>) -> Self {
        self.fail_render = Some(target.into());
        self
    }

    /// Every query issued, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Every `(target, deployment_root)` rendered, in order.
    pub fn renders(&self) -> Vec<(String, PathBuf)> {
        self.renders.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildGraph for MemoryBuildGraph {
    async fn query(&self, query: &str) -> Result<Vec<TargetRecord>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn render(&self, target: &str, deployment_root: &Path) -> Result<()> {
        if self.fail_render.as_deref() == Some(target) {
            return Err(PrerError::CommandFailed {
                command: format!("{target} --nopush"),
                status: "exit status: 1".to_string(),
                stderr: "render failed".to_string(),
            });
        }
        self.renders
            .lock()
            .unwrap()
            .push((target.to_string(), deployment_root.to_path_buf()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCloner / MemoryRepo
// ---------------------------------------------------------------------------

/// Observable state of the fake deployment repository.
#[derive(Debug, Clone, Default)]
pub struct RepoState {
    /// Branch → commit messages, oldest first.
    pub branches: BTreeMap<String, Vec<String>>,
    pub current: String,
    /// Branches created by `switch_to_branch`.
    pub created: Vec<String>,
    /// Branches reset by `recreate_branch`.
    pub recreated: Vec<String>,
    /// `(branch, message)` of every commit that recorded changes.
    pub commits: Vec<(String, String)>,
    /// Every batch passed to `push`.
    pub pushed: Vec<Vec<String>>,
    /// Branches whose commits report no changes.
    pub unchanged: BTreeSet<String>,
    /// Directories cloned into.
    pub clones: Vec<PathBuf>,
}

/// Cloner handing out [`MemoryRepo`]s over one shared state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloner {
    state: Arc<Mutex<RepoState>>,
    fail_clone: bool,
}

impl MemoryCloner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing remote branch with its commit history.
    pub fn with_branch(self, name: &str, messages: &[&str]) -> Self {
        self.state.lock().unwrap().branches.insert(
            name.to_string(),
            messages.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    /// Commits on `branch` report no changes.
    pub fn unchanged(self, branch: &str) -> Self {
        self.state.lock().unwrap().unchanged.insert(branch.to_string());
        self
    }

    /// Make every clone fail.
    pub fn failing(mut self) -> Self {
        self.fail_clone = true;
        self
    }

    /// Snapshot of the repository state.
    pub fn state(&self) -> RepoState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoCloner for MemoryCloner {
    async fn clone_or_checkout(&self, opts: &CloneOptions) -> Result<Box<dyn DeployRepo>> {
        if self.fail_clone {
            return Err(PrerError::Git(format!("clone {}: repository not found", opts.repo)));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.clones.push(opts.dir.clone());
            state
                .branches
                .entry(opts.base_branch.clone())
                .or_insert_with(|| vec!["initial".to_string()]);
            state.current = opts.base_branch.clone();
        }
        Ok(Box::new(MemoryRepo {
            dir: opts.dir.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Working tree over [`RepoState`].
#[derive(Debug)]
pub struct MemoryRepo {
    dir: PathBuf,
    state: Arc<Mutex<RepoState>>,
}

#[async_trait]
impl DeployRepo for MemoryRepo {
    fn root(&self) -> &Path {
        &self.dir
    }

    async fn switch_to_branch(&mut self, branch: &str, base: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.current = branch.to_string();
        if state.branches.contains_key(branch) {
            return Ok(false);
        }
        let history = state.branches.get(base).cloned().unwrap_or_default();
        state.branches.insert(branch.to_string(), history);
        state.created.push(branch.to_string());
        Ok(true)
    }

    async fn last_commit_message(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .branches
            .get(&state.current)
            .and_then(|h| h.last().cloned())
            .unwrap_or_default())
    }

    async fn recreate_branch(&mut self, branch: &str, base: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let history = state.branches.get(base).cloned().unwrap_or_default();
        state.branches.insert(branch.to_string(), history);
        state.recreated.push(branch.to_string());
        state.current = branch.to_string();
        Ok(())
    }

    async fn commit(&mut self, message: &str, _subpath: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let branch = state.current.clone();
        if state.unchanged.contains(&branch) {
            return Ok(false);
        }
        state
            .branches
            .entry(branch.clone())
            .or_default()
            .push(message.to_string());
        state.commits.push((branch, message.to_string()));
        Ok(true)
    }

    async fn push(&self, branches: &[String]) -> Result<()> {
        self.state.lock().unwrap().pushed.push(branches.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryGitServer
// ---------------------------------------------------------------------------

/// A pull request as received by [`MemoryGitServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub from: String,
    pub to: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct MemoryGitServer {
    prs: Mutex<Vec<PullRequest>>,
    fail: bool,
}

impl MemoryGitServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every pull request.
    pub fn failing() -> Self {
        Self {
            prs: Mutex::default(),
            fail: true,
        }
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.prs.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitServer for MemoryGitServer {
    async fn create_pr(&self, from: &str, to: &str, title: &str, body: &str) -> Result<()> {
        if self.fail {
            return Err(PrerError::CreatePr {
                source_branch: from.to_string(),
                target_branch: to.to_string(),
                reason: "401 Unauthorized".to_string(),
            });
        }
        self.prs.lock().unwrap().push(PullRequest {
            from: from.to_string(),
            to: to.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// Task runner that records what ran and how many ran at once.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    active: AtomicUsize,
    peak: AtomicUsize,
    ran: Mutex<Vec<String>>,
    delay: Duration,
    fail_on: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every task for `delay` so overlapping tasks are observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the task with this identifier.
    pub fn fail_on(mut self, identifier: impl Into<String>) -> Self {
        self.fail_on = Some(identifier.into());
        self
    }

    /// Identifiers of tasks that ran to completion, in completion order.
    pub fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }

    /// Highest number of tasks observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    async fn run(&self, task: &PushTask) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.as_deref() == Some(task.identifier.as_str()) {
            return Err(PrerError::CommandFailed {
                command: task.identifier.clone(),
                status: "exit status: 1".to_string(),
                stderr: "push rejected".to_string(),
            });
        }
        self.ran.lock().unwrap().push(task.identifier.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(dir: &str) -> CloneOptions {
        CloneOptions {
            repo: "mem://gitops".to_string(),
            dir: PathBuf::from(dir),
            mirror: None,
            base_branch: "master".to_string(),
            subpath: "cloud".to_string(),
            branch_prefix: "deploy/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_repo_branch_lifecycle() {
        let cloner = MemoryCloner::new().with_branch("deploy/a", &["initial", "old deploy"]);
        let mut repo = cloner.clone_or_checkout(&opts("/tmp/m")).await.unwrap();

        assert!(!repo.switch_to_branch("deploy/a", "master").await.unwrap());
        assert_eq!(repo.last_commit_message().await.unwrap(), "old deploy");

        repo.recreate_branch("deploy/a", "master").await.unwrap();
        assert_eq!(repo.last_commit_message().await.unwrap(), "initial");

        assert!(repo.switch_to_branch("deploy/b", "master").await.unwrap());
        assert!(repo.commit("new deploy", "cloud").await.unwrap());

        let state = cloner.state();
        assert_eq!(state.created, vec!["deploy/b"]);
        assert_eq!(state.recreated, vec!["deploy/a"]);
        assert_eq!(state.commits, vec![("deploy/b".to_string(), "new deploy".to_string())]);
    }

    #[tokio::test]
    async fn test_memory_build_graph_drains_responses() {
        let graph = MemoryBuildGraph::new().respond(vec![TargetRecord::new("//a:push")]);
        assert_eq!(graph.query("q1").await.unwrap().len(), 1);
        assert!(graph.query("q2").await.unwrap().is_empty());
        assert_eq!(graph.queries(), vec!["q1", "q2"]);
    }
}
