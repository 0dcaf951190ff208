//! Baseline comparison
//!
//! Compares a fresh report against a stored baseline. A change above
//! `+threshold%` is a regression, one below `-threshold%` an improvement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::results::baseline::BaselineRecord;
use crate::results::report::Report;

/// Duration change of a single test present in both runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestChange {
    pub name: String,
    pub baseline_ms: u64,
    pub current_ms: u64,
    pub change_percent: f64,
}

/// Result of comparing a report against a baseline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegressionComparison {
    pub baseline_generated_at: DateTime<Utc>,
    pub threshold_percent: f64,
    pub baseline_duration_ms: u64,
    pub current_duration_ms: u64,
    pub duration_change_percent: f64,
    pub is_regression: bool,
    pub is_improvement: bool,

    /// Peak memory change, when both runs carry it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_change_percent: Option<f64>,

    pub per_test_regressions: Vec<TestChange>,
    pub per_test_improvements: Vec<TestChange>,
}

impl RegressionComparison {
    pub fn has_regressions(&self) -> bool {
        self.is_regression || !self.per_test_regressions.is_empty()
    }
}

/// Percentage change from `baseline` to `current`; zero when the baseline is zero
pub fn percent_change(baseline: f64, current: f64) -> f64 {
    if baseline <= 0.0 {
        0.0
    } else {
        (current - baseline) / baseline * 100.0
    }
}

/// Compare a report with a baseline. Tests present in only one of them are
/// ignored.
pub fn compare_to_baseline(
    report: &Report,
    baseline: &BaselineRecord,
    threshold_percent: f64,
) -> RegressionComparison {
    let baseline_duration_ms = baseline.test_summary.duration_ms;
    let current_duration_ms = report.summary.duration_ms;
    let duration_change_percent =
        percent_change(baseline_duration_ms as f64, current_duration_ms as f64);

    let memory_change_percent = match (
        baseline.performance.as_ref().and_then(|p| p.peak_memory_mb),
        report.performance.as_ref().and_then(|p| p.peak_memory_mb()),
    ) {
        (Some(before), Some(after)) => Some(percent_change(before, after)),
        _ => None,
    };

    let mut per_test_regressions = Vec::new();
    let mut per_test_improvements = Vec::new();

    for (name, current_ms) in &report.test_durations {
        let Some(baseline_ms) = baseline.tests.get(name) else {
            continue;
        };

        let change = TestChange {
            name: name.clone(),
            baseline_ms: *baseline_ms,
            current_ms: *current_ms,
            change_percent: percent_change(*baseline_ms as f64, *current_ms as f64),
        };

        if change.change_percent > threshold_percent {
            per_test_regressions.push(change);
        } else if change.change_percent < -threshold_percent {
            per_test_improvements.push(change);
        }
    }

    RegressionComparison {
        baseline_generated_at: baseline.generated_at,
        threshold_percent,
        baseline_duration_ms,
        current_duration_ms,
        duration_change_percent,
        is_regression: duration_change_percent > threshold_percent,
        is_improvement: duration_change_percent < -threshold_percent,
        memory_change_percent,
        per_test_regressions,
        per_test_improvements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestRecord, TestResult};
    use crate::results::baseline::EnvironmentDescriptor;
    use crate::results::report::summarize;

    fn environment() -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            is_ci: false,
            ci_provider: None,
            is_container: false,
            os: "linux".into(),
            arch: "aarch64".into(),
            platform: String::new(),
            processor_count: 4,
            available_memory_mb: 0,
            tool_version: "0.0.0".into(),
        }
    }

    fn report_with(duration_ms: u64, tests: &[(&str, u64)]) -> Report {
        let records = tests
            .iter()
            .map(|(name, ms)| TestRecord::passed(*name, *ms))
            .collect();
        summarize(&TestResult::from_records(records, duration_ms), None)
    }

    fn baseline_with(duration_ms: u64, tests: &[(&str, u64)]) -> BaselineRecord {
        BaselineRecord::with_environment(&report_with(duration_ms, tests), environment())
    }

    #[test]
    fn test_regression_symmetry() {
        let baseline = baseline_with(100_000, &[]);

        let slower = compare_to_baseline(&report_with(106_000, &[]), &baseline, 5.0);
        assert!(slower.is_regression);
        assert!(!slower.is_improvement);

        let faster = compare_to_baseline(&report_with(94_000, &[]), &baseline, 5.0);
        assert!(faster.is_improvement);
        assert!(!faster.is_regression);

        let similar = compare_to_baseline(&report_with(103_000, &[]), &baseline, 5.0);
        assert!(!similar.is_regression);
        assert!(!similar.is_improvement);
        assert!((similar.duration_change_percent - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_threshold_is_not_a_regression() {
        let baseline = baseline_with(100_000, &[]);
        let comparison = compare_to_baseline(&report_with(105_000, &[]), &baseline, 5.0);
        assert!(!comparison.is_regression);
    }

    #[test]
    fn test_per_test_changes_ignore_unmatched_names() {
        let baseline = baseline_with(1_000, &[("a", 100), ("b", 100), ("gone", 50)]);
        let report = report_with(1_000, &[("a", 150), ("b", 80), ("new", 999)]);

        let comparison = compare_to_baseline(&report, &baseline, 10.0);
        assert_eq!(comparison.per_test_regressions.len(), 1);
        assert_eq!(comparison.per_test_regressions[0].name, "a");
        assert_eq!(comparison.per_test_regressions[0].change_percent, 50.0);
        assert_eq!(comparison.per_test_improvements.len(), 1);
        assert_eq!(comparison.per_test_improvements[0].name, "b");
        assert!(comparison.has_regressions());
    }

    #[test]
    fn test_same_named_tests_in_different_files_compare_separately() {
        let run = |json_ms, yaml_ms| {
            let records = vec![
                TestRecord::passed("roundtrip", json_ms).with_file("tests/json.rs"),
                TestRecord::passed("roundtrip", yaml_ms).with_file("tests/yaml.rs"),
            ];
            summarize(&TestResult::from_records(records, 1_000), None)
        };
        let baseline = BaselineRecord::with_environment(&run(100, 100), environment());

        let comparison = compare_to_baseline(&run(100, 300), &baseline, 10.0);
        assert_eq!(comparison.per_test_regressions.len(), 1);
        assert_eq!(comparison.per_test_regressions[0].name, "tests/yaml.rs::roundtrip");
        assert!(comparison.per_test_improvements.is_empty());
    }

    #[test]
    fn test_zero_baseline_duration() {
        let baseline = baseline_with(0, &[("a", 0)]);
        let comparison = compare_to_baseline(&report_with(500, &[("a", 10)]), &baseline, 5.0);
        assert_eq!(comparison.duration_change_percent, 0.0);
        assert!(!comparison.is_regression);
        assert!(comparison.per_test_regressions.is_empty());
    }
}
