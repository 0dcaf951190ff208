//! Result aggregation
//!
//! Derived scores, baseline persistence and baseline comparison.

mod baseline;
mod compare;
mod report;

pub use baseline::{BaselinePerformance, BaselineRecord, BaselineStore, EnvironmentDescriptor};
pub use compare::{compare_to_baseline, percent_change, RegressionComparison, TestChange};
pub use report::{
    generate_run_id, grade_score, stability_score, summarize, FailureDetail, Grade, Report,
    TestSummary,
};
