//! prer core library
//!
//! Release train reconciliation for GitOps promotion: groups deployable
//! targets into trains, keeps one deployment branch per train in step with
//! what the train contains, pushes the images the changed trains depend on
//! under a concurrency bound, and opens pull requests on the hosting backend.

pub mod bazel;
pub mod commitmsg;
pub mod config;
pub mod deps;
pub mod error;
pub mod fakes;
pub mod git;
pub mod hosting;
pub mod process;
pub mod promote;
pub mod push;
pub mod query;
pub mod reconcile;
pub mod telemetry;
pub mod train;

pub use bazel::{Bazel, BuildGraph};
pub use config::PrerConfig;
pub use deps::{build_query, filters_from_flags, DependencyFilter, DEFAULT_KINDS};
pub use error::{PrerError, Result};
pub use git::{CloneOptions, DeployRepo, GitRepo, RepoCloner, SystemGit};
pub use hosting::{
    connect, BitbucketConfig, GitHost, GitHubConfig, GitLabConfig, GitServer, HostingConfig,
};
pub use promote::{PromoteOutcome, Promoter, RunResult};
pub use push::{BazelTaskRunner, PushCommand, PushExecutor, PushTask, TaskRunner};
pub use query::TargetRecord;
pub use reconcile::BranchState;
pub use telemetry::init_tracing;
pub use train::ReleaseTrains;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
