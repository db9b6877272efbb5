//! Release train classification.
//!
//! A release train is the set of gitops targets that share one deployment
//! branch. Trains come either from explicit `train:command` pairs supplied on
//! the command line or from the `deployment_branch` attribute of gitops rules
//! returned by the build graph.

use std::collections::BTreeMap;

use crate::error::{PrerError, Result};
use crate::query::TargetRecord;

/// Rule attribute naming the train a gitops target belongs to.
pub const DEPLOYMENT_BRANCH_ATTR: &str = "deployment_branch";

/// Train name → member targets (or pre-resolved commands).
///
/// A `BTreeMap` keeps the iteration order stable within and across runs.
pub type ReleaseTrains = BTreeMap<String, Vec<String>>;

/// Group `train:command` pairs into trains.
///
/// The command part may itself contain `:`; only the first separator splits.
pub fn from_resolved_binaries<S: AsRef<str>>(pairs: &[S]) -> Result<ReleaseTrains> {
    let mut trains = ReleaseTrains::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (train, command) = pair
            .split_once(':')
            .ok_or_else(|| PrerError::InvalidResolvedBinary(pair.to_string()))?;
        trains
            .entry(train.to_string())
            .or_default()
            .push(command.to_string());
    }
    Ok(trains)
}

/// Group query results by the value of `attribute`.
///
/// Records with a missing or empty value are left out. Duplicate records are
/// kept as-is.
pub fn classify(records: &[TargetRecord], attribute: &str) -> ReleaseTrains {
    let mut trains = ReleaseTrains::new();
    for record in records {
        match record.attribute(attribute) {
            Some(train) if !train.is_empty() => trains
                .entry(train.to_string())
                .or_default()
                .push(record.name.clone()),
            _ => {}
        }
    }
    trains
}

/// Query selecting gitops rules of `release_branch` under `scope`.
pub fn discovery_query(release_branch: &str, scope: &str) -> String {
    format!(
        "attr({DEPLOYMENT_BRANCH_ATTR}, \".+\", attr(release_branch_prefix, \"{release_branch}\", kind(gitops, {scope})))"
    )
}

/// Deployment branch name for `train`.
pub fn branch_name(prefix: &str, train: &str, suffix: &str) -> String {
    format!("{prefix}{train}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(name: &str, branch: Option<&str>) -> TargetRecord {
        let mut attributes = BTreeMap::new();
        if let Some(b) = branch {
            attributes.insert(DEPLOYMENT_BRANCH_ATTR.to_string(), b.to_string());
        }
        attributes.insert("release_branch_prefix".to_string(), "master".to_string());
        TargetRecord {
            name: name.to_string(),
            attributes,
        }
    }

    #[test]
    fn test_classify_groups_by_attribute() {
        let records = vec![
            record("//a:gitops", Some("alpha")),
            record("//b:gitops", Some("beta")),
            record("//a2:gitops", Some("alpha")),
        ];
        let trains = classify(&records, DEPLOYMENT_BRANCH_ATTR);
        assert_eq!(trains.len(), 2);
        assert_eq!(trains["alpha"], vec!["//a:gitops", "//a2:gitops"]);
        assert_eq!(trains["beta"], vec!["//b:gitops"]);
    }

    #[test]
    fn test_classify_partitions_tagged_targets() {
        let records = vec![
            record("//a:gitops", Some("alpha")),
            record("//b:gitops", Some("")),
            record("//c:gitops", None),
            record("//d:gitops", Some("delta")),
            record("//e:gitops", Some("alpha")),
        ];
        let trains = classify(&records, DEPLOYMENT_BRANCH_ATTR);

        let mut seen = BTreeSet::new();
        for members in trains.values() {
            for m in members {
                assert!(seen.insert(m.clone()), "{m} appears in two trains");
            }
        }
        let tagged: BTreeSet<String> = ["//a:gitops", "//d:gitops", "//e:gitops"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(seen, tagged);
    }

    #[test]
    fn test_classify_keeps_duplicates() {
        let records = vec![record("//a:gitops", Some("alpha")), record("//a:gitops", Some("alpha"))];
        let trains = classify(&records, DEPLOYMENT_BRANCH_ATTR);
        assert_eq!(trains["alpha"].len(), 2);
    }

    #[test]
    fn test_classify_empty_result() {
        assert!(classify(&[], DEPLOYMENT_BRANCH_ATTR).is_empty());
    }

    #[test]
    fn test_resolved_binaries_grouping() {
        let trains = from_resolved_binaries(&[
            "alpha:bazel-bin/a/gitops",
            "beta:bazel-bin/b/gitops",
            "alpha:bazel-bin/a2/gitops",
        ])
        .unwrap();
        assert_eq!(trains["alpha"], vec!["bazel-bin/a/gitops", "bazel-bin/a2/gitops"]);
        assert_eq!(trains["beta"], vec!["bazel-bin/b/gitops"]);
    }

    #[test]
    fn test_resolved_binary_splits_on_first_colon() {
        let trains = from_resolved_binaries(&["alpha:C:/tools/gitops.exe"]).unwrap();
        assert_eq!(trains["alpha"], vec!["C:/tools/gitops.exe"]);
    }

    #[test]
    fn test_resolved_binary_without_separator_is_rejected() {
        let err = from_resolved_binaries(&["just-a-command"]).unwrap_err();
        assert!(matches!(err, PrerError::InvalidResolvedBinary(ref s) if s == "just-a-command"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_discovery_query() {
        assert_eq!(
            discovery_query("master", "//..."),
            "attr(deployment_branch, \".+\", attr(release_branch_prefix, \"master\", kind(gitops, //...)))"
        );
    }

    #[test]
    fn test_branch_name() {
        assert_eq!(branch_name("deploy/", "alpha", ""), "deploy/alpha");
        assert_eq!(branch_name("deploy/", "alpha", "-v2"), "deploy/alpha-v2");
    }
}
