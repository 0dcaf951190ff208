//! Work specification handed to the orchestrator
//!
//! Pairs the workload with the inputs, filter and verbosity passed across the
//! test framework boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::executor::Workload;

/// Test selection forwarded to the test framework
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFilter {
    /// Test name patterns to run (empty = all)
    #[serde(default)]
    pub name_patterns: Vec<String>,

    /// Only run tests carrying one of these tags
    #[serde(default)]
    pub include_tags: Vec<String>,

    /// Never run tests carrying one of these tags
    #[serde(default)]
    pub exclude_tags: Vec<String>,
}

impl TestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_patterns.push(pattern.into());
        self
    }

    pub fn include_tag(mut self, tag: impl Into<String>) -> Self {
        self.include_tags.push(tag.into());
        self
    }

    pub fn exclude_tag(mut self, tag: impl Into<String>) -> Self {
        self.exclude_tags.push(tag.into());
        self
    }
}

/// Output verbosity requested from the test framework
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    Minimal,
    #[default]
    Normal,
    Detailed,
    Diagnostic,
}

impl Verbosity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quiet" | "none" => Some(Verbosity::Quiet),
            "minimal" => Some(Verbosity::Minimal),
            "normal" => Some(Verbosity::Normal),
            "detailed" => Some(Verbosity::Detailed),
            "diagnostic" => Some(Verbosity::Diagnostic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Minimal => "minimal",
            Verbosity::Normal => "normal",
            Verbosity::Detailed => "detailed",
            Verbosity::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the test framework receives for one invocation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestInvocation {
    pub inputs: Vec<PathBuf>,
    pub filter: TestFilter,
    pub verbosity: Verbosity,
}

/// A unit of work plus the ordered input paths it depends on.
///
/// Immutable once built; the orchestrator only borrows it for one run.
#[derive(Clone)]
pub struct WorkSpec {
    name: String,
    invocation: TestInvocation,
    workload: Arc<dyn Workload>,
}

impl WorkSpec {
    pub fn new(name: impl Into<String>, workload: Arc<dyn Workload>) -> Self {
        Self {
            name: name.into(),
            invocation: TestInvocation::default(),
            workload,
        }
    }

    pub fn with_inputs<I, P>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.invocation.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: TestFilter) -> Self {
        self.invocation.filter = filter;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.invocation.verbosity = verbosity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.invocation.inputs
    }

    pub fn invocation(&self) -> &TestInvocation {
        &self.invocation
    }

    pub fn workload(&self) -> Arc<dyn Workload> {
        Arc::clone(&self.workload)
    }
}

impl fmt::Debug for WorkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkSpec")
            .field("name", &self.name)
            .field("invocation", &self.invocation)
            .field("workload", &self.workload.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_str() {
        assert_eq!(Verbosity::from_str("DETAILED"), Some(Verbosity::Detailed));
        assert_eq!(Verbosity::from_str("none"), Some(Verbosity::Quiet));
        assert_eq!(Verbosity::from_str("loud"), None);
        assert_eq!(Verbosity::default().as_str(), "normal");
    }

    #[test]
    fn test_filter_builder() {
        let filter = TestFilter::new()
            .pattern("parser::*")
            .include_tag("unit")
            .exclude_tag("slow");
        assert_eq!(filter.name_patterns, vec!["parser::*"]);
        assert_eq!(filter.include_tags, vec!["unit"]);
        assert_eq!(filter.exclude_tags, vec!["slow"]);
        assert_eq!(TestFilter::new(), TestFilter::default());
    }
}
