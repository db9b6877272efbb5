//! Build graph query results.
//!
//! The build tool answers `cquery --output=jsonproto`; only rule targets and
//! their string-valued attributes are kept.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{PrerError, Result};

/// A rule target returned by a build graph query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetRecord {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl TargetRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter, mostly for tests and fakes.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct CqueryResult {
    #[serde(default)]
    results: Vec<ConfiguredTarget>,
}

#[derive(Debug, Deserialize)]
struct ConfiguredTarget {
    target: Target,
}

#[derive(Debug, Deserialize)]
struct Target {
    #[serde(default)]
    rule: Option<Rule>,
}

#[derive(Debug, Deserialize)]
struct Rule {
    name: String,
    #[serde(default)]
    attribute: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attribute {
    name: String,
    #[serde(default)]
    string_value: Option<String>,
}

/// Decode `cquery --output=jsonproto` output into target records.
///
/// Empty output means an empty result set.
pub fn decode_jsonproto(bytes: &[u8]) -> Result<Vec<TargetRecord>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let parsed: CqueryResult = serde_json::from_slice(bytes)
        .map_err(|e| PrerError::MalformedQueryOutput(e.to_string()))?;

    Ok(parsed
        .results
        .into_iter()
        .filter_map(|configured| configured.target.rule)
        .map(|rule| TargetRecord {
            name: rule.name,
            attributes: rule
                .attribute
                .into_iter()
                .filter_map(|a| a.string_value.map(|v| (a.name, v)))
                .collect(),
        })
        .collect())
}

/// Path of the executable bazel builds for `target`, relative to the workspace.
///
/// Labels outside the main repository and plain paths are returned as-is.
pub fn target_to_executable(target: &str) -> String {
    let Some(label) = target.strip_prefix("//") else {
        return target.to_string();
    };
    let (package, name) = match label.split_once(':') {
        Some(split) => split,
        // `//pkg/name` is shorthand for `//pkg/name:name`.
        None => (label, label.rsplit('/').next().unwrap_or(label)),
    };
    if package.is_empty() {
        format!("bazel-bin/{name}")
    } else {
        format!("bazel-bin/{package}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "results": [
        {
          "target": {
            "type": "RULE",
            "rule": {
              "name": "//apps/alpha:gitops",
              "ruleClass": "gitops",
              "attribute": [
                {"name": "deployment_branch", "type": "STRING", "stringValue": "alpha"},
                {"name": "release_branch_prefix", "type": "STRING", "stringValue": "master"},
                {"name": "tags", "type": "STRING_LIST", "stringListValue": ["x"]}
              ]
            }
          },
          "configuration": {"checksum": "abc"}
        },
        {
          "target": {
            "type": "SOURCE_FILE",
            "sourceFile": {"name": "//apps/alpha:BUILD"}
          }
        }
      ]
    }"#;

    #[test]
    fn test_decode_keeps_rules_and_string_attributes() {
        let records = decode_jsonproto(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.name, "//apps/alpha:gitops");
        assert_eq!(r.attribute("deployment_branch"), Some("alpha"));
        assert_eq!(r.attribute("release_branch_prefix"), Some("master"));
        assert_eq!(r.attribute("tags"), None);
    }

    #[test]
    fn test_decode_empty_output() {
        assert!(decode_jsonproto(b"").unwrap().is_empty());
        assert!(decode_jsonproto(b"  \n").unwrap().is_empty());
        assert!(decode_jsonproto(b"{}").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_jsonproto(b"\x08\x12binary proto").unwrap_err();
        assert!(matches!(err, PrerError::MalformedQueryOutput(_)));
    }

    #[test]
    fn test_target_to_executable() {
        assert_eq!(
            target_to_executable("//apps/alpha:gitops"),
            "bazel-bin/apps/alpha/gitops"
        );
        assert_eq!(target_to_executable("//:push"), "bazel-bin/push");
        assert_eq!(target_to_executable("//apps/beta"), "bazel-bin/apps/beta/beta");
        assert_eq!(
            target_to_executable("bazel-bin/apps/alpha/gitops"),
            "bazel-bin/apps/alpha/gitops"
        );
        assert_eq!(target_to_executable("@ext//pkg:t"), "@ext//pkg:t");
    }
}
