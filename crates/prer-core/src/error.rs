//! Error taxonomy for GitOps promotion.
//!
//! Variants are grouped the way a run can fail: configuration problems are
//! detected before any mutation, external tool and version-control failures
//! abort the run, and publishing failures happen after branches are pushed.

/// Errors produced by the promotion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PrerError {
    // -- configuration -------------------------------------------------------
    #[error("unknown vcs host: {0}")]
    UnknownGitHost(String),

    #[error("invalid resolved_binary format: {0}")]
    InvalidResolvedBinary(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // -- external tools ------------------------------------------------------
    #[error("command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed build query output: {0}")]
    MalformedQueryOutput(String),

    #[error("push task {identifier} failed: {reason}")]
    PushFailed { identifier: String, reason: String },

    // -- version control -----------------------------------------------------
    #[error("git error: {0}")]
    Git(String),

    // -- publishing ----------------------------------------------------------
    #[error("unable to create PR from {source_branch} into {target_branch}: {reason}")]
    CreatePr {
        source_branch: String,
        target_branch: String,
        reason: String,
    },

    // -- conversions ---------------------------------------------------------
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrerError {
    /// Whether the error was raised before any repository mutation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PrerError::UnknownGitHost(_)
                | PrerError::InvalidResolvedBinary(_)
                | PrerError::InvalidConfig(_)
        )
    }
}

/// Result type for promotion operations.
pub type Result<T> = std::result::Result<T, PrerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display_carries_context() {
        let err = PrerError::CommandFailed {
            command: "tools/bazel cquery kind(gitops, //...)".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "ERROR: no such package".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tools/bazel cquery"));
        assert!(msg.contains("exit status: 1"));
        assert!(msg.contains("no such package"));
    }

    #[test]
    fn test_configuration_errors_are_classified() {
        assert!(PrerError::UnknownGitHost("gitea".to_string()).is_configuration());
        assert!(PrerError::InvalidResolvedBinary("nocolon".to_string()).is_configuration());
        assert!(!PrerError::Git("clone failed".to_string()).is_configuration());
    }

    #[test]
    fn test_create_pr_error_names_branches() {
        let err = PrerError::CreatePr {
            source_branch: "deploy/alpha".to_string(),
            target_branch: "master".to_string(),
            reason: "401 Unauthorized".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("deploy/alpha"));
        assert!(msg.contains("master"));
    }
}
