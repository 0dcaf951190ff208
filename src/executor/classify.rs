//! Failure classification
//!
//! Maps workload failures to a [`FailureKind`]. Typed I/O errors anywhere in
//! the error chain are checked first, then the rendered message is matched
//! against a table of case-insensitive substrings.

use std::collections::BTreeMap;
use std::io;
use std::sync::OnceLock;

use super::error::FailureKind;

const BUILTIN_RULES: &[(&str, FailureKind)] = &[
    ("permission denied", FailureKind::Fatal),
    ("access is denied", FailureKind::Fatal),
    ("access denied", FailureKind::Fatal),
    ("unauthorized", FailureKind::Fatal),
    ("file is locked", FailureKind::Transient),
    ("being used by another process", FailureKind::Transient),
    ("resource temporarily unavailable", FailureKind::Transient),
    ("connection reset", FailureKind::Transient),
    ("network", FailureKind::Transient),
    ("out of memory", FailureKind::Transient),
    ("timed out", FailureKind::Transient),
];

static BUILTIN: OnceLock<FailureClassifier> = OnceLock::new();

/// Substring table plus I/O error kind mapping
#[derive(Clone, Debug)]
pub struct FailureClassifier {
    rules: Vec<(String, FailureKind)>,
}

impl FailureClassifier {
    /// Classifier with only the built-in rules
    pub fn builtin() -> &'static FailureClassifier {
        BUILTIN.get_or_init(|| FailureClassifier {
            rules: BUILTIN_RULES
                .iter()
                .map(|(pattern, kind)| (pattern.to_string(), *kind))
                .collect(),
        })
    }

    /// Built-in rules extended with caller rules.
    ///
    /// Caller rules are consulted before the built-in ones.
    pub fn with_rules(extra: &BTreeMap<String, FailureKind>) -> Self {
        let mut rules: Vec<(String, FailureKind)> = extra
            .iter()
            .filter(|(pattern, _)| !pattern.trim().is_empty())
            .map(|(pattern, kind)| (pattern.to_lowercase(), *kind))
            .collect();
        rules.extend(Self::builtin().rules.iter().cloned());
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify an error and its causes
    pub fn classify(&self, err: &anyhow::Error) -> FailureKind {
        for cause in err.chain() {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                if let Some(kind) = io_error_kind(io_err.kind()) {
                    return kind;
                }
            }
        }

        self.classify_message(&format!("{:#}", err))
    }

    /// Classify a plain failure message
    pub fn classify_message(&self, message: &str) -> FailureKind {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| message.contains(pattern.as_str()))
            .map(|(_, kind)| *kind)
            .unwrap_or(FailureKind::Unknown)
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

fn io_error_kind(kind: io::ErrorKind) -> Option<FailureKind> {
    match kind {
        io::ErrorKind::PermissionDenied => Some(FailureKind::Fatal),
        io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::OutOfMemory => Some(FailureKind::Transient),
        _ => None,
    }
}
