//! Execution error types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::retry::AttemptRecord;
use super::supervisor::SupervisedRun;

/// How a failure should be treated by the retry coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Expected to go away when retried (file lock, network blip, memory pressure)
    Transient,
    /// Never retried (permission or access denied)
    Fatal,
    /// Not recognised; retried like a transient failure
    Unknown,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Fatal)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "transient" => Some(FailureKind::Transient),
            "fatal" => Some(FailureKind::Fatal),
            "unknown" => Some(FailureKind::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Failure of a single supervised execution
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The wall-clock budget ran out; no result is available.
    ///
    /// `worker_stopped` is false when the worker was still running after
    /// forced termination and had to be abandoned.
    #[error("Workload timed out after {elapsed:?}{}", abandoned_note(.worker_stopped))]
    Timeout {
        elapsed: Duration,
        worker_stopped: bool,
    },

    /// The workload could not be started at all (missing test command)
    #[error("Setup failure: {cause}")]
    Setup { cause: String },

    /// The workload failed before producing a result
    #[error("Worker fault ({kind}): {cause}")]
    WorkerFault { cause: String, kind: FailureKind },

    /// The workload produced a result with failed tests and the caller asked
    /// for such results to be retried
    #[error("{failed} of {total} tests failed")]
    TestsFailed {
        failed: usize,
        total: usize,
        run: Box<SupervisedRun>,
    },
}

impl ExecutionError {
    pub fn worker_fault(cause: impl Into<String>, kind: FailureKind) -> Self {
        ExecutionError::WorkerFault {
            cause: cause.into(),
            kind,
        }
    }

    /// Classification carried by the error itself
    pub fn kind(&self) -> FailureKind {
        match self {
            // Retrying next to an abandoned worker would run two copies at once
            ExecutionError::Timeout { worker_stopped, .. } => {
                if *worker_stopped {
                    FailureKind::Transient
                } else {
                    FailureKind::Fatal
                }
            }
            ExecutionError::Setup { .. } => FailureKind::Fatal,
            ExecutionError::WorkerFault { kind, .. } => *kind,
            ExecutionError::TestsFailed { .. } => FailureKind::Transient,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }
}

fn abandoned_note(worker_stopped: &bool) -> &'static str {
    if *worker_stopped {
        ""
    } else {
        " (worker abandoned)"
    }
}

/// Marker for workload errors that mean the run cannot start, as opposed to
/// a test run that failed
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SetupFailure(pub String);

/// Failure of a whole run after retries
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Giving up after {attempts} attempts: {last_failure}")]
    ExhaustedRetries {
        attempts: u32,
        last_failure: ExecutionError,
        history: Vec<AttemptRecord>,
    },

    #[error("Fatal failure: {failure}")]
    Fatal {
        failure: ExecutionError,
        history: Vec<AttemptRecord>,
    },

    #[error("Setup error: {0}")]
    Setup(String),
}

impl RunError {
    /// Attempt history, empty for setup errors
    pub fn history(&self) -> &[AttemptRecord] {
        match self {
            RunError::ExhaustedRetries { history, .. } | RunError::Fatal { history, .. } => {
                history
            }
            RunError::Setup(_) => &[],
        }
    }

    /// The underlying execution failure, if any
    pub fn last_failure(&self) -> Option<&ExecutionError> {
        match self {
            RunError::ExhaustedRetries { last_failure, .. } => Some(last_failure),
            RunError::Fatal { failure, .. } => Some(failure),
            RunError::Setup(_) => None,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Setup(_)
            | RunError::Fatal {
                failure: ExecutionError::Setup { .. },
                ..
            } => 2,
            RunError::ExhaustedRetries {
                last_failure: ExecutionError::TestsFailed { .. },
                ..
            } => 1,
            _ => 3,
        }
    }
}
