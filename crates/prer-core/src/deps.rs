//! Dependency query construction for the push phase.
//!
//! After the deployment trees are committed, every push target reachable
//! from the changed gitops targets has to run. The filters select those
//! targets by rule kind, by name pattern or by attribute value, and the
//! sub-queries are joined with `union`.

use std::fmt;

/// Rule kinds pushed when no filter is configured.
pub const DEFAULT_KINDS: [&str; 2] = ["k8s_container_push", "push_oci"];

/// One dependency filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyFilter {
    /// `kind(K, deps(..))`
    Kind(String),
    /// `filter(N, deps(..))`
    Name(String),
    /// `attr(A, V, deps(..))`; a missing value matches anything.
    Attr { name: String, value: Option<String> },
}

impl DependencyFilter {
    /// Parse an `attribute[=value]` filter.
    pub fn attr(spec: &str) -> Self {
        match spec.split_once('=') {
            Some((name, value)) => DependencyFilter::Attr {
                name: name.to_string(),
                value: Some(value.to_string()),
            },
            None => DependencyFilter::Attr {
                name: spec.to_string(),
                value: None,
            },
        }
    }

    fn render(&self, deps: &str) -> String {
        match self {
            DependencyFilter::Kind(kind) => format!("kind({kind}, deps({deps}))"),
            DependencyFilter::Name(name) => format!("filter({name}, deps({deps}))"),
            DependencyFilter::Attr { name, value } => {
                let value = value.as_deref().unwrap_or(".*");
                format!("attr({name}, {value}, deps({deps}))")
            }
        }
    }
}

impl fmt::Display for DependencyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyFilter::Kind(k) => write!(f, "kind={k}"),
            DependencyFilter::Name(n) => write!(f, "name={n}"),
            DependencyFilter::Attr { name, value: Some(v) } => write!(f, "attr={name}={v}"),
            DependencyFilter::Attr { name, value: None } => write!(f, "attr={name}"),
        }
    }
}

/// Filters from the three repeatable command line lists.
///
/// Kinds fall back to [`DEFAULT_KINDS`] when none are given.
pub fn filters_from_flags<S: AsRef<str>>(kinds: &[S], names: &[S], attrs: &[S]) -> Vec<DependencyFilter> {
    let mut filters: Vec<DependencyFilter> = if kinds.is_empty() {
        DEFAULT_KINDS
            .iter()
            .map(|k| DependencyFilter::Kind(k.to_string()))
            .collect()
    } else {
        kinds
            .iter()
            .map(|k| DependencyFilter::Kind(k.as_ref().to_string()))
            .collect()
    };
    filters.extend(names.iter().map(|n| DependencyFilter::Name(n.as_ref().to_string())));
    filters.extend(attrs.iter().map(|a| DependencyFilter::attr(a.as_ref())));
    filters
}

/// Quoted target-set literal: `set('//a' '//b')`.
///
/// Labels are single-quoted because `+` and other characters are operators in
/// the query language.
pub fn target_set<S: AsRef<str>>(targets: &[S]) -> String {
    let quoted: Vec<String> = targets
        .iter()
        .map(|t| format!("'{}'", t.as_ref()))
        .collect();
    format!("set({})", quoted.join(" "))
}

/// Union query over the dependency closure of `targets`.
///
/// An empty filter list uses the default push kinds.
pub fn build_query<S: AsRef<str>>(targets: &[S], filters: &[DependencyFilter]) -> String {
    let deps = target_set(targets);
    let defaults;
    let filters: &[DependencyFilter] = if filters.is_empty() {
        defaults = DEFAULT_KINDS
            .iter()
            .map(|k| DependencyFilter::Kind(k.to_string()))
            .collect::<Vec<_>>();
        &defaults
    } else {
        filters
    };

    filters
        .iter()
        .map(|f| f.render(&deps))
        .collect::<Vec<_>>()
        .join(" union ")
}
