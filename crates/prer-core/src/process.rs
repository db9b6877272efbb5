//! Subprocess execution with full error context.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::error::{PrerError, Result};

/// Render `program args...` for logs and error messages.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg.as_ref());
    }
    line
}

/// Run a command to completion and capture its output, whatever the exit status.
pub async fn output<S: AsRef<str>>(program: &str, args: &[S], cwd: Option<&Path>) -> Result<Output> {
    let mut cmd = Command::new(program);
    for arg in args {
        let arg: &str = arg.as_ref();
        cmd.arg(arg);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(command = %command_line(program, args), "running");
    cmd.output().await.map_err(|source| PrerError::Spawn {
        command: command_line(program, args),
        source,
    })
}

/// Run a command and return its stdout; a non-zero exit is an error.
pub async fn run<S: AsRef<str>>(program: &str, args: &[S], cwd: Option<&Path>) -> Result<String> {
    let out = output(program, args, cwd).await?;
    if !out.status.success() {
        return Err(PrerError::CommandFailed {
            command: command_line(program, args),
            status: out.status.to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
