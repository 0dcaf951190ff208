//! Output formatters for run outcomes
//!
//! Provides table, JSON and summary renderings plus file export.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::executor::{AttemptRecord, RunOutcome};
use crate::models::TestRecord;
use crate::results::{Grade, RegressionComparison, Report};
use crate::utils::format_duration;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Machine readable form of a run outcome
#[derive(Serialize)]
struct OutcomeDocument<'a> {
    report: &'a Report,
    #[serde(skip_serializing_if = "Option::is_none")]
    comparison: Option<&'a RegressionComparison>,
    from_cache: bool,
    attempts: &'a [AttemptRecord],
    tests: &'a [TestRecord],
}

impl<'a> OutcomeDocument<'a> {
    fn new(outcome: &'a RunOutcome) -> Self {
        Self {
            report: &outcome.report,
            comparison: outcome.comparison.as_ref(),
            from_cache: outcome.from_cache,
            attempts: &outcome.history,
            tests: &outcome.result.records,
        }
    }
}

/// Renders run outcomes for the terminal
pub struct ReportFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format_outcome(&self, outcome: &RunOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.format_table(outcome)),
            OutputFormat::Json => serde_json::to_string(&OutcomeDocument::new(outcome))
                .context("Failed to serialize outcome"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(&OutcomeDocument::new(outcome))
                    .context("Failed to serialize outcome")
            }
            OutputFormat::Summary => Ok(self.format_summary(outcome)),
        }
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.colorize {
            format!("\x1b[{color}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn grade_color(grade: Grade) -> &'static str {
        match grade {
            Grade::A | Grade::B => "32",
            Grade::C | Grade::D => "33",
            Grade::F => "31",
        }
    }

    fn format_table(&self, outcome: &RunOutcome) -> String {
        let report = &outcome.report;
        let summary = &report.summary;
        let mut output = String::new();

        output.push_str("\n══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" Test Run {}", report.run_id));
        if outcome.from_cache {
            output.push_str(&self.paint(" (cached)", "36"));
        }
        output.push_str("\n══════════════════════════════════════════════════════════════\n");

        let failed = if summary.failed > 0 {
            self.paint(&summary.failed.to_string(), "31")
        } else {
            summary.failed.to_string()
        };
        output.push_str(&format!(
            " Total: {} | Passed: {} | Failed: {} | Skipped: {}",
            summary.total,
            self.paint(&summary.passed.to_string(), "32"),
            failed,
            summary.skipped
        ));
        if summary.inconclusive + summary.not_run > 0 {
            output.push_str(&format!(
                " | Inconclusive: {} | Not run: {}",
                summary.inconclusive, summary.not_run
            ));
        }
        output.push('\n');

        output.push_str(&format!(
            " Success rate: {:.1}% | Duration: {}\n",
            report.success_rate,
            format_duration(Duration::from_millis(summary.duration_ms))
        ));
        output.push_str(&format!(
            " Grade: {} ({}/100) | Stability: {:.1}\n",
            self.paint(&report.grade.to_string(), Self::grade_color(report.grade)),
            report.grade_score,
            report.stability_score
        ));

        if let Some(perf) = &report.performance {
            output.push_str(" ──────────────────────────────────────────────────────────────\n");
            if let Some(peak) = perf.peak_memory_mb() {
                output.push_str(&format!(" Peak memory:    {:.1} MB\n", peak));
            }
            if let Some(avg) = perf.average_memory_mb() {
                output.push_str(&format!(" Average memory: {:.1} MB\n", avg));
            }
            if let Some(cpu) = perf.average_cpu_percent {
                output.push_str(&format!(" Average CPU:    {:.1}%\n", cpu));
            }
            output.push_str(&format!(" Samples:        {}\n", perf.sample_count));
        }

        if !report.failures.is_empty() {
            output.push_str(" ──────────────────────────────────────────────────────────────\n");
            output.push_str(&format!(" {}\n", self.paint("Failed tests:", "31")));
            for failure in &report.failures {
                output.push_str(&format!("   ✗ {}", failure.name));
                if !failure.file.is_empty() {
                    output.push_str(&format!(" ({})", failure.file));
                }
                output.push('\n');
                if let Some(message) = &failure.message {
                    for line in message.lines().take(3) {
                        output.push_str(&format!("       {}\n", line));
                    }
                }
            }
        }

        if outcome.history.len() > 1 {
            output.push_str(" ──────────────────────────────────────────────────────────────\n");
            output.push_str(" Attempts:\n");
            for record in &outcome.history {
                output.push_str(&format!("   {}\n", record));
            }
        }

        if let Some(comparison) = &outcome.comparison {
            output.push_str(" ──────────────────────────────────────────────────────────────\n");
            output.push_str(&self.format_comparison(comparison));
        }

        output
    }

    fn format_comparison(&self, comparison: &RegressionComparison) -> String {
        let mut output = format!(
            " Baseline ({}): {} -> {} ({:+.1}%)",
            comparison.baseline_generated_at.format("%Y-%m-%d"),
            format_duration(Duration::from_millis(comparison.baseline_duration_ms)),
            format_duration(Duration::from_millis(comparison.current_duration_ms)),
            comparison.duration_change_percent
        );

        if comparison.is_regression {
            output.push_str(&format!(" {}", self.paint("REGRESSION", "31")));
        } else if comparison.is_improvement {
            output.push_str(&format!(" {}", self.paint("IMPROVED", "32")));
        }
        output.push('\n');

        if let Some(memory) = comparison.memory_change_percent {
            output.push_str(&format!(" Peak memory change: {:+.1}%\n", memory));
        }

        for change in &comparison.per_test_regressions {
            output.push_str(&format!(
                "   ▲ {} {}ms -> {}ms ({:+.1}%)\n",
                change.name, change.baseline_ms, change.current_ms, change.change_percent
            ));
        }
        for change in &comparison.per_test_improvements {
            output.push_str(&format!(
                "   ▼ {} {}ms -> {}ms ({:+.1}%)\n",
                change.name, change.baseline_ms, change.current_ms, change.change_percent
            ));
        }

        output
    }

    fn format_summary(&self, outcome: &RunOutcome) -> String {
        let report = &outcome.report;
        let mut line = format!(
            "{}/{} passed ({:.1}%) in {} - grade {}",
            report.summary.passed,
            report.summary.total,
            report.success_rate,
            format_duration(Duration::from_millis(report.summary.duration_ms)),
            report.grade
        );
        if outcome.from_cache {
            line.push_str(" [cached]");
        }
        if outcome.history.len() > 1 {
            line.push_str(&format!(" after {} attempts", outcome.history.len()));
        }
        if let Some(comparison) = &outcome.comparison {
            line.push_str(&format!(
                ", {:+.1}% vs baseline",
                comparison.duration_change_percent
            ));
        }
        line
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

/// Write an outcome to a file; CSV holds one row per test
pub fn export_outcome(outcome: &RunOutcome, path: &Path, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Json => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &OutcomeDocument::new(outcome))
                .context("Failed to write outcome")?;
            writer
                .flush()
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_path(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;

            writer.write_record(["name", "file", "outcome", "duration_ms", "error"])?;
            for record in &outcome.result.records {
                writer.write_record([
                    record.name.clone(),
                    record.file.clone(),
                    record.outcome.to_string(),
                    record.duration_ms.to_string(),
                    record.error_message.clone().unwrap_or_default(),
                ])?;
            }
            writer.flush()?;
        }
    }

    info!("Exported results to {}", path.display());
    Ok(())
}
