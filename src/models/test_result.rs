//! Test result models
//!
//! Defines per-test records, outcomes and the aggregated run result.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Outcome of a single test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Inconclusive,
    NotRun,
}

impl TestOutcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "✓",
            TestOutcome::Failed => "✗",
            TestOutcome::Skipped => "○",
            TestOutcome::Inconclusive => "?",
            TestOutcome::NotRun => "-",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "PASS"),
            TestOutcome::Failed => write!(f, "FAIL"),
            TestOutcome::Skipped => write!(f, "SKIP"),
            TestOutcome::Inconclusive => write!(f, "INCONCLUSIVE"),
            TestOutcome::NotRun => write!(f, "NOT RUN"),
        }
    }
}

/// Result of a single test case as reported by the test framework
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    #[serde(default)]
    pub file: String,
    pub outcome: TestOutcome,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TestRecord {
    /// Identity across runs: `file::name`, or just the name when the
    /// framework reports no file
    pub fn key(&self) -> String {
        if self.file.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.file, self.name)
        }
    }
}

// Records normally arrive as JSON from the test framework
#[cfg(test)]
impl TestRecord {
    pub fn new(name: impl Into<String>, outcome: TestOutcome, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            file: String::new(),
            outcome,
            duration_ms,
            error_message: None,
        }
    }

    pub fn passed(name: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(name, TestOutcome::Passed, duration_ms)
    }

    pub fn failed(name: impl Into<String>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self::new(name, TestOutcome::Failed, duration_ms).with_error(message)
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self::new(name, TestOutcome::Skipped, 0)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

impl fmt::Display for TestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.name,
            self.duration_ms
        )?;
        if let Some(msg) = &self.error_message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// A test result that violates the counting invariants
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResultError {
    #[error("total {total} does not match the sum of outcome counts ({sum})")]
    CountMismatch { total: usize, sum: usize },

    #[error("{outcome} count is {reported} but {actual} records carry that outcome")]
    RecordMismatch {
        outcome: TestOutcome,
        reported: usize,
        actual: usize,
    },
}

/// Aggregated result of one test workload execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub inconclusive: usize,
    #[serde(default)]
    pub not_run: usize,
    pub duration_ms: u64,
    #[serde(default)]
    pub records: Vec<TestRecord>,
}

impl TestResult {
    /// Build a summary-only result for frameworks that report counts but no records
    pub fn from_counts(passed: usize, failed: usize, skipped: usize, duration_ms: u64) -> Self {
        Self {
            total: passed + failed + skipped,
            passed,
            failed,
            skipped,
            inconclusive: 0,
            not_run: 0,
            duration_ms,
            records: Vec::new(),
        }
    }

    /// Check the counting invariants of a result produced outside this crate
    pub fn validate(&self) -> Result<(), ResultError> {
        let sum = self.passed + self.failed + self.skipped + self.inconclusive + self.not_run;
        if sum != self.total {
            return Err(ResultError::CountMismatch {
                total: self.total,
                sum,
            });
        }

        if self.records.is_empty() {
            return Ok(());
        }

        for (outcome, reported) in [
            (TestOutcome::Passed, self.passed),
            (TestOutcome::Failed, self.failed),
            (TestOutcome::Skipped, self.skipped),
            (TestOutcome::Inconclusive, self.inconclusive),
            (TestOutcome::NotRun, self.not_run),
        ] {
            let actual = self.records.iter().filter(|r| r.outcome == outcome).count();
            if actual != reported {
                return Err(ResultError::RecordMismatch {
                    outcome,
                    reported,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// Fraction of passed tests (0.0 - 1.0), zero when nothing ran
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    /// Fraction of failed tests (0.0 - 1.0), zero when nothing ran
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn failed_records(&self) -> impl Iterator<Item = &TestRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == TestOutcome::Failed)
    }
}

#[cfg(test)]
impl TestResult {
    /// Build a result from per-test records, deriving every count
    pub fn from_records(records: Vec<TestRecord>, duration_ms: u64) -> Self {
        let count = |outcome: TestOutcome| records.iter().filter(|r| r.outcome == outcome).count();

        Self {
            total: records.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            skipped: count(TestOutcome::Skipped),
            inconclusive: count(TestOutcome::Inconclusive),
            not_run: count(TestOutcome::NotRun),
            duration_ms,
            records,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "  {record}")?;
        }
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Inconclusive: {} | Not run: {}",
            self.total, self.passed, self.failed, self.skipped, self.inconclusive, self.not_run
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.success_rate() * 100.0,
            self.duration_ms
        )
    }
}
