//! Resource requests: the canonical identity of reads issued by a task.
//!
//! Every `by_path` call becomes a `path` request, every `by_glob` call a
//! `patterns` request; the dependency-side variants are tagged `dep-path` /
//! `dep-patterns`. The canonical key serialisation is the identity used by
//! the request-set graph.

use crate::reader::{compile_globs, glob_matches};
use crate::{Error, Result};
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which reader a request was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSide {
    /// The project's own workspace reader.
    Project,
    /// The dependencies reader.
    Dependency,
}

/// A single recorded read request.
///
/// Serialises as `{"type": "...", "value": ...}` with kebab-case type tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ResourceRequest {
    Path(String),
    Patterns(Vec<String>),
    DepPath(String),
    DepPatterns(Vec<String>),
}

impl ResourceRequest {
    /// The canonical identity key: `"<type>:<value>"` for path requests,
    /// `"<type>:<JSON array>"` for pattern requests.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        match self {
            ResourceRequest::Path(p) => format!("path:{p}"),
            ResourceRequest::DepPath(p) => format!("dep-path:{p}"),
            ResourceRequest::Patterns(pats) => {
                format!("patterns:{}", json_array(pats))
            }
            ResourceRequest::DepPatterns(pats) => {
                format!("dep-patterns:{}", json_array(pats))
            }
        }
    }

    #[must_use]
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            ResourceRequest::Patterns(_) | ResourceRequest::DepPatterns(_)
        )
    }

    #[must_use]
    pub fn side(&self) -> RequestSide {
        match self {
            ResourceRequest::Path(_) | ResourceRequest::Patterns(_) => RequestSide::Project,
            ResourceRequest::DepPath(_) | ResourceRequest::DepPatterns(_) => {
                RequestSide::Dependency
            }
        }
    }

    /// Compile a matcher deciding which virtual paths this request covers.
    pub fn matcher(&self) -> Result<RequestMatcher> {
        match self {
            ResourceRequest::Path(p) | ResourceRequest::DepPath(p) => {
                Ok(RequestMatcher::Exact(p.clone()))
            }
            ResourceRequest::Patterns(pats) | ResourceRequest::DepPatterns(pats) => {
                Ok(RequestMatcher::Globs(compile_globs(pats)?))
            }
        }
    }
}

fn json_array(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| String::from("[]"))
}

/// A compiled matcher for one request.
#[derive(Debug)]
pub enum RequestMatcher {
    Exact(String),
    Globs(GlobSet),
}

impl RequestMatcher {
    #[must_use]
    pub fn matches(&self, virtual_path: &str) -> bool {
        match self {
            RequestMatcher::Exact(p) => {
                p.trim_start_matches('/') == virtual_path.trim_start_matches('/')
            }
            RequestMatcher::Globs(set) => glob_matches(set, virtual_path),
        }
    }
}

/// The reads a monitored reader captured during one task execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecording {
    /// Every distinct path passed to `by_path`.
    pub paths: BTreeSet<String>,
    /// Every pattern list passed to `by_glob`, in call order.
    pub patterns: Vec<Vec<String>>,
}

impl RequestRecording {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.patterns.is_empty()
    }

    /// Convert into the ordered request list for the given side.
    ///
    /// Paths come first (sorted), followed by pattern requests in call
    /// order. Duplicate pattern lists collapse to one request.
    #[must_use]
    pub fn to_requests(&self, side: RequestSide) -> Vec<ResourceRequest> {
        let mut requests: Vec<ResourceRequest> = Vec::new();
        for path in &self.paths {
            requests.push(match side {
                RequestSide::Project => ResourceRequest::Path(path.clone()),
                RequestSide::Dependency => ResourceRequest::DepPath(path.clone()),
            });
        }
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for patterns in &self.patterns {
            let request = match side {
                RequestSide::Project => ResourceRequest::Patterns(patterns.clone()),
                RequestSide::Dependency => ResourceRequest::DepPatterns(patterns.clone()),
            };
            if seen.insert(request.canonical_key()) {
                requests.push(request);
            }
        }
        requests
    }
}

/// Parse a canonical key back into a request.
///
/// Used when restoring serialised request-set graphs.
pub fn parse_canonical_key(key: &str) -> Result<ResourceRequest> {
    let (tag, value) = key
        .split_once(':')
        .ok_or_else(|| Error::configuration(format!("Malformed request key '{key}'")))?;
    match tag {
        "path" => Ok(ResourceRequest::Path(value.to_string())),
        "dep-path" => Ok(ResourceRequest::DepPath(value.to_string())),
        "patterns" => Ok(ResourceRequest::Patterns(parse_patterns(key, value)?)),
        "dep-patterns" => Ok(ResourceRequest::DepPatterns(parse_patterns(key, value)?)),
        other => Err(Error::configuration(format!(
            "Unknown request type '{other}' in key '{key}'"
        ))),
    }
}

fn parse_patterns(key: &str, value: &str) -> Result<Vec<String>> {
    serde_json::from_str(value)
        .map_err(|e| Error::configuration(format!("Malformed pattern key '{key}': {e}")))
}
