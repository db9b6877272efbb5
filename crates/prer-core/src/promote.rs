//! Promotion run.
//!
//! Drives the sequential phases of one run: discover trains, reconcile and
//! render each train's branch, push the images the changed trains depend on,
//! then publish the branches and open pull requests. Only the push phase is
//! concurrent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{info, warn};

use crate::bazel::BuildGraph;
use crate::commitmsg;
use crate::config::PrerConfig;
use crate::deps;
use crate::error::Result;
use crate::git::{DeployRepo, RepoCloner};
use crate::hosting::GitServer;
use crate::push::{PushExecutor, PushTask};
use crate::reconcile::{self, BranchState};
use crate::train::{self, ReleaseTrains, DEPLOYMENT_BRANCH_ATTR};

/// What a run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Branches with a new commit, in train order.
    pub updated_branches: Vec<String>,
    pub updated_trains: BTreeSet<String>,
    /// Targets of the changed trains; seeds the dependency query.
    pub updated_targets: Vec<String>,
    /// Reconciliation decision for every train processed.
    pub branch_states: BTreeMap<String, BranchState>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// No train matched; nothing was checked out.
    NoTargets,
    /// Every train rendered to what its branch already holds.
    NoChanges,
    Promoted(RunResult),
}

/// One promotion run over its collaborators.
pub struct Promoter {
    config: Arc<PrerConfig>,
    build: Arc<dyn BuildGraph>,
    cloner: Arc<dyn RepoCloner>,
    pushes: PushExecutor,
    server: Arc<dyn GitServer>,
}

impl Promoter {
    pub fn new(
        config: Arc<PrerConfig>,
        build: Arc<dyn BuildGraph>,
        cloner: Arc<dyn RepoCloner>,
        pushes: PushExecutor,
        server: Arc<dyn GitServer>,
    ) -> Self {
        Self {
            config,
            build,
            cloner,
            pushes,
            server,
        }
    }

    pub async fn run(&self) -> Result<PromoteOutcome> {
        let trains = self.discover_trains().await?;
        if trains.is_empty() {
            info!("No matching targets found");
            return Ok(PromoteOutcome::NoTargets);
        }
        print_trains(&trains);

        let (dir, _guard) = self.scratch_dir()?;
        let opts = self.config.clone_options(dir);
        let mut repo = self.cloner.clone_or_checkout(&opts).await?;

        let result = self.reconcile_trains(repo.as_mut(), &trains).await?;
        if result.updated_branches.is_empty() {
            info!("No gitops changes to push");
            return Ok(PromoteOutcome::NoChanges);
        }

        self.push_images(&result.updated_targets).await?;
        self.publish(repo.as_ref(), &result.updated_branches).await?;
        Ok(PromoteOutcome::Promoted(result))
    }

    /// Explicit trains win; otherwise classify the build graph.
    async fn discover_trains(&self) -> Result<ReleaseTrains> {
        if let Some(trains) = &self.config.resolved_trains {
            return Ok(trains.clone());
        }
        let query = train::discovery_query(&self.config.release_branch, &self.config.target);
        let records = self.build.query(&query).await?;
        Ok(train::classify(&records, DEPLOYMENT_BRANCH_ATTR))
    }

    /// Checkout location plus the guard that removes it when dropped.
    fn scratch_dir(&self) -> Result<(PathBuf, Option<TempDir>)> {
        let ws = &self.config.workspace;
        if let Some(dir) = &self.config.gitops_dir {
            return Ok((ws.join(dir), None));
        }
        let tmp = tempfile::Builder::new()
            .prefix("gitops")
            .tempdir_in(ws.join(&self.config.gitops_tmpdir))?;
        Ok((tmp.path().to_path_buf(), Some(tmp)))
    }

    async fn reconcile_trains(
        &self,
        repo: &mut dyn DeployRepo,
        trains: &ReleaseTrains,
    ) -> Result<RunResult> {
        let cfg = &self.config;
        let mut result = RunResult::default();

        for (train, targets) in trains {
            info!(train = %train, "reconciling");
            let branch = cfg.branch_for(train);
            let state =
                reconcile::reconcile_branch(repo, &branch, &cfg.pr_into, targets.as_slice())
                    .await?;
            result.branch_states.insert(train.clone(), state);

            let root = repo.root().to_path_buf();
            for target in targets {
                info!(train = %train, target = %target, "rendering");
                self.build.render(target, &root).await?;
            }

            let message = commitmsg::deployment_message(
                &cfg.release_branch,
                &cfg.branch_name,
                &cfg.git_commit,
                targets.as_slice(),
            );
            if repo.commit(&message, &cfg.gitops_path).await? {
                info!(branch = %branch, "branch has changes, push is required");
                result.updated_targets.extend(targets.iter().cloned());
                result.updated_branches.push(branch);
                result.updated_trains.insert(train.clone());
            }
        }
        Ok(result)
    }

    async fn push_images(&self, updated_targets: &[String]) -> Result<()> {
        if !self.config.resolved_pushes.is_empty() {
            let pushed = self.pushes.run_each(self.config.resolved_pushes.clone()).await?;
            info!(pushed, "resolved pushes complete");
            return Ok(());
        }

        let query = deps::build_query(updated_targets, &self.config.dependency_filters);
        let records = self.build.query(&query).await?;
        let pushed = self
            .pushes
            .run_pool(records.into_iter().map(|r| PushTask::for_target(r.name)))
            .await?;
        info!(pushed, "image pushes complete");
        Ok(())
    }

    async fn publish(&self, repo: &dyn DeployRepo, branches: &[String]) -> Result<()> {
        let cfg = &self.config;
        if cfg.dry_run {
            info!(branches = ?branches, "dry-run: skipping push");
            for branch in branches {
                info!(branch = %branch, into = %cfg.pr_into, "dry-run: skipping PR creation");
            }
            return Ok(());
        }

        repo.push(branches).await?;
        for branch in branches {
            let title = cfg.pr_title_for(branch);
            let body = cfg.pr_body_for(branch);
            if let Err(e) = self.server.create_pr(branch, &cfg.pr_into, &title, &body).await {
                warn!(branch = %branch, "branch pushed but pull request was not created");
                return Err(e);
            }
        }
        Ok(())
    }
}

fn print_trains(trains: &ReleaseTrains) {
    for (train, targets) in trains {
        println!("{train}");
        for target in targets {
            println!("  {target}");
        }
    }
}
