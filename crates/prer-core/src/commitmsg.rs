//! Target lists embedded in deployment commit messages.
//!
//! A deployment branch carries no side database. The last commit on the
//! branch records which gitops targets produced it, between two marker lines:
//!
//! ```text
//! GitOps for release branch master from feature/x commit 1a2b3c
//!
//! --- gitops targets begin ---
//! //apps/alpha:gitops
//! --- gitops targets end ---
//! ```

use std::collections::BTreeSet;

/// Opening marker of the target block.
pub const BEGIN_TAG: &str = "--- gitops targets begin ---";
/// Closing marker of the target block.
pub const END_TAG: &str = "--- gitops targets end ---";

/// Render the target block for `targets`.
///
/// Names are sorted and de-duplicated so the same set always renders to the
/// same text. Each name takes one line, so only build labels and command
/// lines round-trip: blank names, names spanning several lines and names
/// equal to a marker are not recovered by [`extract_targets`].
pub fn generate<S: AsRef<str>>(targets: &[S]) -> String {
    let unique: BTreeSet<&str> = targets.iter().map(AsRef::as_ref).collect();

    let mut out = String::from("\n");
    out.push_str(BEGIN_TAG);
    out.push('\n');
    for target in unique {
        out.push_str(target);
        out.push('\n');
    }
    out.push_str(END_TAG);
    out.push('\n');
    out
}

/// Collect the targets recorded in `message`.
///
/// A message without a target block yields an empty set.
pub fn extract_targets(message: &str) -> BTreeSet<String> {
    let mut targets = BTreeSet::new();
    let mut inside = false;

    for line in message.lines() {
        let line = line.trim_end_matches('\r');
        if line == BEGIN_TAG {
            inside = true;
            continue;
        }
        if line == END_TAG {
            inside = false;
            continue;
        }
        if inside && !line.trim().is_empty() {
            targets.insert(line.to_string());
        }
    }

    targets
}

/// Full commit message for a train's deployment commit.
pub fn deployment_message<S: AsRef<str>>(
    release_branch: &str,
    branch_name: &str,
    git_commit: &str,
    targets: &[S],
) -> String {
    format!(
        "GitOps for release branch {release_branch} from {branch_name} commit {git_commit}\n{}",
        generate(targets)
    )
}
