//! Build tool client.
//!
//! The build graph is a black box reached through subprocesses: `cquery`
//! answers graph questions, built gitops targets render manifests, and
//! `run` executes targets that are not standalone executables.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PrerError, Result};
use crate::process::{self, command_line};
use crate::query::{decode_jsonproto, target_to_executable, TargetRecord};

/// Build graph queries and gitops target rendering.
#[async_trait]
pub trait BuildGraph: Send + Sync {
    /// Evaluate `query` and return the matching rule targets.
    async fn query(&self, query: &str) -> Result<Vec<TargetRecord>>;

    /// Render the manifests of gitops `target` under `deployment_root`.
    async fn render(&self, target: &str, deployment_root: &Path) -> Result<()>;
}

/// Bazel invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct Bazel {
    command: String,
    workspace: PathBuf,
}

impl Bazel {
    pub fn new(command: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            workspace: workspace.into(),
        }
    }

    /// The build tool binary.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Workspace root all commands run in.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Location of the executable built for `target`.
    ///
    /// Relative paths resolve against the workspace; a bare program name is
    /// left for `PATH` lookup.
    pub fn executable(&self, target: &str) -> PathBuf {
        self.resolve(&target_to_executable(target))
    }

    fn resolve(&self, program: &str) -> PathBuf {
        if program.contains('/') {
            self.workspace.join(program)
        } else {
            PathBuf::from(program)
        }
    }
}

#[async_trait]
impl BuildGraph for Bazel {
    async fn query(&self, query: &str) -> Result<Vec<TargetRecord>> {
        info!(query, "executing bazel cquery");
        let args = ["cquery", query, "--output=jsonproto"];
        let line = command_line(&self.command, &args);

        let mut child = Command::new(self.resolve(&self.command))
            .args(args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PrerError::Spawn {
                command: line.clone(),
                source,
            })?;

        // Progress and diagnostics stream straight through; the copy ends when
        // the child closes its stderr.
        if let Some(mut stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut sink = tokio::io::stderr();
                let _ = tokio::io::copy(&mut stderr, &mut sink).await;
            });
        }

        let out = child.wait_with_output().await?;
        if !out.status.success() {
            return Err(PrerError::CommandFailed {
                command: line,
                status: out.status.to_string(),
                stderr: "see build tool output above".to_string(),
            });
        }

        let records = decode_jsonproto(&out.stdout)?;
        debug!(count = records.len(), "query returned targets");
        Ok(records)
    }

    async fn render(&self, target: &str, deployment_root: &Path) -> Result<()> {
        let exe = self.executable(target);
        let exe = exe.to_string_lossy();
        let root = deployment_root.to_string_lossy();
        let out = process::run(
            exe.as_ref(),
            &["--nopush", "--deployment_root", root.as_ref()],
            Some(&self.workspace),
        )
        .await?;
        if !out.trim().is_empty() {
            debug!(target, output = %out.trim(), "rendered");
        }
        Ok(())
    }
}
