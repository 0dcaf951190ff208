//! Run report
//!
//! Reduces a test result and its performance summary into derived scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{PerformanceSummary, TestResult};

/// Point deductions applied when a run exceeds a threshold.
///
/// Only the first matching row of each metric applies.
const DURATION_DEDUCTIONS: &[(f64, u32)] = &[(600.0, 30), (300.0, 20), (60.0, 10)];
const MEMORY_DEDUCTIONS: &[(f64, u32)] = &[(2048.0, 30), (1024.0, 20), (512.0, 10)];
const CPU_DEDUCTIONS: &[(f64, u32)] = &[(90.0, 20), (75.0, 10)];

/// Performance grade
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Grade::A,
            80..=89 => Grade::B,
            70..=79 => Grade::C,
            60..=69 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}

/// Outcome counts and duration of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub inconclusive: usize,
    #[serde(default)]
    pub not_run: usize,
    pub duration_ms: u64,
}

impl TestSummary {
    pub fn from_result(result: &TestResult) -> Self {
        Self {
            total: result.total,
            passed: result.passed,
            failed: result.failed,
            skipped: result.skipped,
            inconclusive: result.inconclusive,
            not_run: result.not_run,
            duration_ms: result.duration_ms,
        }
    }
}

/// A failed test as listed in reports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub name: String,
    pub file: String,
    pub message: Option<String>,
}

/// Report for one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: TestSummary,

    /// Passed / total as a percentage
    pub success_rate: f64,

    pub grade: Grade,
    pub grade_score: u32,

    /// 0 - 100
    pub stability_score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceSummary>,

    /// Duration per test, keyed by `file::name` (or the name alone when the
    /// test has no file)
    #[serde(default)]
    pub test_durations: BTreeMap<String, u64>,

    #[serde(default)]
    pub failures: Vec<FailureDetail>,
}

impl Report {
    pub fn duration_secs(&self) -> f64 {
        self.summary.duration_ms as f64 / 1000.0
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

/// Build the report for a run. The inputs are not modified.
pub fn summarize(result: &TestResult, performance: Option<&PerformanceSummary>) -> Report {
    let grade_score = grade_score(result.duration_ms, performance);

    Report {
        run_id: generate_run_id(),
        generated_at: Utc::now(),
        summary: TestSummary::from_result(result),
        success_rate: result.success_rate() * 100.0,
        grade: Grade::from_score(grade_score),
        grade_score,
        stability_score: stability_score(result),
        performance: performance.cloned(),
        test_durations: result
            .records
            .iter()
            .map(|r| (r.key(), r.duration_ms))
            .collect(),
        failures: result
            .failed_records()
            .map(|r| FailureDetail {
                name: r.name.clone(),
                file: r.file.clone(),
                message: r.error_message.clone(),
            })
            .collect(),
    }
}

/// 100 minus the deductions for duration, peak memory and average CPU
pub fn grade_score(duration_ms: u64, performance: Option<&PerformanceSummary>) -> u32 {
    let mut deductions = deduction(duration_ms as f64 / 1000.0, DURATION_DEDUCTIONS);

    if let Some(perf) = performance {
        if let Some(peak_mb) = perf.peak_memory_mb() {
            deductions += deduction(peak_mb, MEMORY_DEDUCTIONS);
        }
        if let Some(cpu) = perf.average_cpu_percent {
            deductions += deduction(cpu, CPU_DEDUCTIONS);
        }
    }

    100u32.saturating_sub(deductions)
}

fn deduction(value: f64, table: &[(f64, u32)]) -> u32 {
    table
        .iter()
        .find(|(limit, _)| value > *limit)
        .map(|(_, points)| *points)
        .unwrap_or(0)
}

/// `(1 - failure rate) * 100` plus a bonus for large suites, clamped to 0 - 100
pub fn stability_score(result: &TestResult) -> f64 {
    let bonus = match result.total {
        100.. => 5.0,
        50..=99 => 2.0,
        _ => 0.0,
    };
    ((1.0 - result.failure_rate()) * 100.0 + bonus).clamp(0.0, 100.0)
}

/// Unique run id: timestamp plus a random suffix
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestRecord;

    fn perf(peak_mb: u64, cpu: Option<f64>) -> PerformanceSummary {
        PerformanceSummary {
            peak_memory_bytes: Some(peak_mb * 1024 * 1024),
            average_memory_bytes: Some(peak_mb * 1024 * 1024),
            average_cpu_percent: cpu,
            sample_count: 4,
        }
    }

    #[test]
    fn test_summarize_counts_and_rates() {
        let result = TestResult::from_records(
            vec![
                TestRecord::passed("parses_empty", 10),
                TestRecord::passed("parses_nested", 25),
                TestRecord::failed("rejects_garbage", 5, "expected error").with_file("parser.rs"),
                TestRecord::skipped("slow_roundtrip"),
            ],
            40,
        );

        let report = summarize(&result, None);
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.success_rate, 50.0);
        assert_eq!(report.test_durations.get("parses_nested"), Some(&25));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file, "parser.rs");
        assert_eq!(report.grade, Grade::A);
        assert_eq!(report.stability_score, 75.0);
        assert!(report.performance.is_none());
    }

    #[test]
    fn test_durations_keep_same_named_tests_apart() {
        let result = TestResult::from_records(
            vec![
                TestRecord::passed("roundtrip", 10).with_file("tests/json.rs"),
                TestRecord::passed("roundtrip", 90).with_file("tests/yaml.rs"),
                TestRecord::passed("smoke", 5),
            ],
            105,
        );

        let report = summarize(&result, None);
        assert_eq!(report.test_durations.len(), 3);
        assert_eq!(report.test_durations.get("tests/json.rs::roundtrip"), Some(&10));
        assert_eq!(report.test_durations.get("tests/yaml.rs::roundtrip"), Some(&90));
        assert_eq!(report.test_durations.get("smoke"), Some(&5));
    }

    #[test]
    fn test_empty_result_has_zero_success_rate() {
        let report = summarize(&TestResult::from_counts(0, 0, 0, 0), None);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.stability_score, 100.0);
    }

    #[test]
    fn test_grade_table() {
        assert_eq!(grade_score(1_000, None), 100);
        assert_eq!(grade_score(90_000, None), 90);
        assert_eq!(grade_score(400_000, Some(&perf(600, None))), 70);
        assert_eq!(grade_score(700_000, Some(&perf(4096, Some(95.0)))), 20);
        assert_eq!(Grade::from_score(90), Grade::A);
        assert_eq!(Grade::from_score(85), Grade::B);
        assert_eq!(Grade::from_score(72), Grade::C);
        assert_eq!(Grade::from_score(60), Grade::D);
        assert_eq!(Grade::from_score(20), Grade::F);
    }

    #[test]
    fn test_stability_bonus_is_clamped() {
        let large = TestResult::from_counts(200, 0, 0, 1);
        assert_eq!(stability_score(&large), 100.0);

        let large_with_failures = TestResult::from_counts(90, 10, 0, 1);
        assert_eq!(stability_score(&large_with_failures), 95.0);
    }

    #[test]
    fn test_summarize_does_not_mutate_inputs() {
        let result = TestResult::from_counts(3, 1, 0, 10);
        let performance = perf(100, Some(10.0));
        let before = (result.clone(), performance.clone());

        let report = summarize(&result, Some(&performance));
        assert_eq!((result, performance.clone()), before);
        assert_eq!(report.performance, Some(performance));
    }

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert!(!id1.is_empty());
        assert_eq!(id1.len(), id2.len());
    }
}
