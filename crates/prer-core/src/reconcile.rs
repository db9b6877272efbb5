//! Deployment branch reconciliation.
//!
//! Each train owns one branch. The branch's last commit records which targets
//! it was rendered from; comparing that record with the current train decides
//! whether the branch can take another commit or must start over from base.

use std::collections::BTreeSet;
use std::fmt;

use tracing::info;

use crate::commitmsg;
use crate::error::Result;
use crate::git::DeployRepo;

/// State of a train's deployment branch at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// Created fresh from base.
    NotExists,
    /// Existing branch; new changes are layered on top.
    ExistsReusable,
    /// Existing branch that lost targets; reset to base.
    ExistsStale,
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchState::NotExists => "not-exists",
            BranchState::ExistsReusable => "exists-reusable",
            BranchState::ExistsStale => "exists-stale",
        };
        f.write_str(name)
    }
}

/// Targets recorded previously that are absent now.
pub fn removed_targets<S: AsRef<str>>(previous: &BTreeSet<String>, current: &[S]) -> BTreeSet<String> {
    let current: BTreeSet<&str> = current.iter().map(AsRef::as_ref).collect();
    previous
        .iter()
        .filter(|t| !current.contains(t.as_str()))
        .cloned()
        .collect()
}

/// Pure branch decision. Only removals make a branch stale; additions never do.
pub fn decide<S: AsRef<str>>(created_fresh: bool, previous: &BTreeSet<String>, current: &[S]) -> BranchState {
    if created_fresh {
        BranchState::NotExists
    } else if removed_targets(previous, current).is_empty() {
        BranchState::ExistsReusable
    } else {
        BranchState::ExistsStale
    }
}

/// Put `repo` on `branch`, ready to receive the rendering of `current`.
///
/// A stale branch is recreated from `base`, dropping its history.
pub async fn reconcile_branch<S: AsRef<str>>(
    repo: &mut dyn DeployRepo,
    branch: &str,
    base: &str,
    current: &[S],
) -> Result<BranchState> {
    let created = repo.switch_to_branch(branch, base).await?;
    if created {
        info!(branch, "created deployment branch");
        return Ok(BranchState::NotExists);
    }

    let previous = commitmsg::extract_targets(&repo.last_commit_message().await?);
    let state = decide(false, &previous, current);
    if state == BranchState::ExistsStale {
        let removed: Vec<String> = removed_targets(&previous, current).into_iter().collect();
        info!(branch, removed = ?removed, "targets removed, recreating branch");
        repo.recreate_branch(branch, base).await?;
    }
    Ok(state)
}
