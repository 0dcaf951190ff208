//! Test execution engine
//!
//! Supervised, retried execution of a workload on a dedicated worker thread.

mod classify;
mod error;
mod retry;
mod runner;
mod supervisor;
mod worker;
mod workload;

pub use classify::FailureClassifier;
pub use error::{ExecutionError, FailureKind, RunError};
pub use retry::{AttemptRecord, AttemptStatus, RetryCoordinator, RetryOutcome, RetryPolicy};
pub use runner::{Orchestrator, RunOutcome};
pub use supervisor::{ExecutionSupervisor, SupervisedRun, SupervisorConfig};
pub use worker::{ChildSignal, WorkerContext};
pub use workload::{
    CommandWorkload, FnWorkload, Workload, EXCLUDE_TAGS_ENV, FILTER_ENV, INCLUDE_TAGS_ENV,
    INPUTS_ENV, RESULTS_FILE_ENV, VERBOSITY_ENV,
};
