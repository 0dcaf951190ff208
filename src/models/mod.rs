//! Data models for test orchestration
//!
//! This module contains the data structures shared by the cache, the
//! executor and the result aggregator.

mod performance;
mod test_result;
mod work;

pub use performance::{PerformanceSample, PerformanceSummary};
pub use test_result::{ResultError, TestOutcome, TestRecord, TestResult};
pub use work::{TestFilter, TestInvocation, Verbosity, WorkSpec};
