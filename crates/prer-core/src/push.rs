//! Bounded push execution.
//!
//! Image pushes are the only concurrent phase of a promotion. At most
//! `parallelism` tasks run at any instant. The first failure stops new work
//! from starting; tasks already running finish, and the failure is reported.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::bazel::Bazel;
use crate::error::{PrerError, Result};
use crate::process;

/// How a push task is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushCommand {
    /// A pre-resolved executable with arguments.
    Exec(Vec<String>),
    /// A build target; resolved to its built executable, or `run` through
    /// the build tool when no such file exists.
    Target(String),
}

/// One unit of push work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTask {
    pub identifier: String,
    pub command: PushCommand,
}

impl PushTask {
    /// Task from a pre-resolved command line (split on whitespace).
    pub fn resolved(command_line: &str) -> Result<Self> {
        let argv: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(PrerError::InvalidConfig(
                "resolved_push must not be empty".to_string(),
            ));
        }
        Ok(Self {
            identifier: command_line.trim().to_string(),
            command: PushCommand::Exec(argv),
        })
    }

    /// Task for a push target discovered in the build graph.
    pub fn for_target(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            identifier: target.clone(),
            command: PushCommand::Target(target),
        }
    }
}

/// Executes a single push task.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &PushTask) -> Result<()>;
}

/// [`TaskRunner`] running commands as subprocesses of the build workspace.
#[derive(Debug, Clone)]
pub struct BazelTaskRunner {
    bazel: Bazel,
}

impl BazelTaskRunner {
    pub fn new(bazel: Bazel) -> Self {
        Self { bazel }
    }

    async fn is_regular_file(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}

#[async_trait]
impl TaskRunner for BazelTaskRunner {
    async fn run(&self, task: &PushTask) -> Result<()> {
        let cwd = Some(self.bazel.workspace());
        match &task.command {
            PushCommand::Exec(argv) => {
                let (program, args) = argv.split_first().ok_or_else(|| {
                    PrerError::InvalidConfig(format!("empty command for {}", task.identifier))
                })?;
                let program = self.bazel.executable(program);
                process::run(&program.to_string_lossy(), args, cwd).await?;
            }
            PushCommand::Target(target) => {
                let exe = self.bazel.executable(target);
                if Self::is_regular_file(&exe).await {
                    let none: [&str; 0] = [];
                    process::run(&exe.to_string_lossy(), &none, cwd).await?;
                } else {
                    info!(target = %target, "target is not a file, running as a command");
                    let program = self.bazel.executable(self.bazel.command());
                    process::run(&program.to_string_lossy(), &["run", target.as_str()], cwd)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Runs push tasks with a fixed concurrency bound.
#[derive(Clone)]
pub struct PushExecutor {
    runner: Arc<dyn TaskRunner>,
    parallelism: usize,
}

impl PushExecutor {
    /// `parallelism` below 1 is treated as 1.
    pub fn new(runner: Arc<dyn TaskRunner>, parallelism: usize) -> Self {
        Self {
            runner,
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Spawn one task per item, gated by a semaphore.
    ///
    /// Returns the number of tasks that completed.
    pub async fn run_each(&self, tasks: Vec<PushTask>) -> Result<usize> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let failed = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for task in tasks {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| push_failed(&task.identifier, e.to_string()))?;
            if failed.load(Ordering::SeqCst) {
                debug!(task = %task.identifier, "not started after earlier failure");
                break;
            }

            let runner = Arc::clone(&self.runner);
            let failed = Arc::clone(&failed);
            set.spawn(async move {
                let _permit = permit;
                info!(task = %task.identifier, "pushing");
                runner.run(&task).await.map_err(|e| {
                    failed.store(true, Ordering::SeqCst);
                    push_failed(&task.identifier, e.to_string())
                })
            });
        }

        let mut completed = 0;
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match flatten(joined) {
                Ok(()) => completed += 1,
                Err(e) => record_failure(&mut first_error, e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    /// Feed tasks through a channel to `parallelism` worker loops.
    ///
    /// Dropping the sender after the last task is the end-of-work signal.
    /// Returns the number of tasks that completed.
    pub async fn run_pool<I>(&self, tasks: I) -> Result<usize>
    where
        I: IntoIterator<Item = PushTask>,
    {
        let (tx, rx) = mpsc::channel::<PushTask>(self.parallelism);
        let rx = Arc::new(Mutex::new(rx));
        let failed = Arc::new(AtomicBool::new(false));
        let mut workers = JoinSet::new();

        for worker in 0..self.parallelism {
            let rx = Arc::clone(&rx);
            let runner = Arc::clone(&self.runner);
            let failed = Arc::clone(&failed);
            workers.spawn(async move {
                let mut done = 0usize;
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(task) = next else {
                        return Ok(done);
                    };
                    if failed.load(Ordering::SeqCst) {
                        return Ok(done);
                    }
                    debug!(worker, task = %task.identifier, "pushing");
                    if let Err(e) = runner.run(&task).await {
                        failed.store(true, Ordering::SeqCst);
                        return Err(push_failed(&task.identifier, e.to_string()));
                    }
                    done += 1;
                }
            });
        }
        drop(rx);

        for task in tasks {
            if failed.load(Ordering::SeqCst) {
                break;
            }
            // Fails once every worker has exited and dropped the receiver.
            if tx.send(task).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut completed = 0;
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(done)) => completed += done,
                Ok(Err(e)) => record_failure(&mut first_error, e),
                Err(e) => record_failure(&mut first_error, join_failed(e)),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }
}

fn push_failed(identifier: &str, reason: String) -> PrerError {
    PrerError::PushFailed {
        identifier: identifier.to_string(),
        reason,
    }
}

fn join_failed(e: JoinError) -> PrerError {
    push_failed("worker", e.to_string())
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(join_failed)?
}

fn record_failure(slot: &mut Option<PrerError>, e: PrerError) {
    warn!(error = %e, "push failed");
    if slot.is_none() {
        *slot = Some(e);
    }
}
