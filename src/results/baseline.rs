//! Baseline persistence
//!
//! A baseline is a single JSON document that is overwritten wholesale when it
//! is regenerated. There is no versioning or merging.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{debug, info};

use crate::cache::write_atomic;
use crate::results::report::{Report, TestSummary};

/// CI providers recognised by their marker variable, most specific first
const CI_PROVIDERS: &[(&str, &str)] = &[
    ("GITHUB_ACTIONS", "GitHub Actions"),
    ("GITLAB_CI", "GitLab CI"),
    ("TF_BUILD", "Azure Pipelines"),
    ("JENKINS_URL", "Jenkins"),
    ("CIRCLECI", "CircleCI"),
    ("TRAVIS", "Travis CI"),
    ("CI", "Generic CI"),
];

const CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];
const CGROUP_MARKERS: &[&str] = &["docker", "kubepods", "containerd", "lxc", "podman"];

/// Where a baseline was recorded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    pub is_ci: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_provider: Option<String>,
    pub is_container: bool,
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub platform: String,
    pub processor_count: usize,
    #[serde(default)]
    pub available_memory_mb: u64,
    pub tool_version: String,
}

impl EnvironmentDescriptor {
    /// Describe the machine this process runs on
    pub fn detect() -> Self {
        let ci_provider = detect_ci(|key| std::env::var(key).ok());

        let mut system = System::new();
        system.refresh_memory();

        Self {
            is_ci: ci_provider.is_some(),
            ci_provider,
            is_container: detect_container(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            platform: System::long_os_version().unwrap_or_default(),
            processor_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            available_memory_mb: system.available_memory() / (1024 * 1024),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn detect_ci<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    CI_PROVIDERS
        .iter()
        .find(|(key, _)| {
            lookup(key)
                .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(false)
        })
        .map(|(_, name)| name.to_string())
}

fn detect_container() -> bool {
    if CONTAINER_MARKERS.iter().any(|p| Path::new(p).exists()) {
        return true;
    }

    std::fs::read_to_string("/proc/1/cgroup")
        .map(|cgroup| CGROUP_MARKERS.iter().any(|m| cgroup.contains(m)))
        .unwrap_or(false)
}

/// Performance block of a baseline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselinePerformance {
    pub duration_ms: u64,
    pub peak_memory_mb: Option<f64>,
    pub average_memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// Persisted summary of a reference run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub generated_at: DateTime<Utc>,
    pub test_summary: TestSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<BaselinePerformance>,
    pub environment: EnvironmentDescriptor,
    /// Duration per test name
    #[serde(default)]
    pub tests: BTreeMap<String, u64>,
}

impl BaselineRecord {
    pub fn from_report(report: &Report) -> Self {
        Self::with_environment(report, EnvironmentDescriptor::detect())
    }

    pub fn with_environment(report: &Report, environment: EnvironmentDescriptor) -> Self {
        let performance = report.performance.as_ref().map(|perf| BaselinePerformance {
            duration_ms: report.summary.duration_ms,
            peak_memory_mb: perf.peak_memory_mb(),
            average_memory_mb: perf.average_memory_mb(),
            cpu_percent: perf.average_cpu_percent,
        });

        Self {
            generated_at: Utc::now(),
            test_summary: report.summary.clone(),
            performance,
            environment,
            tests: report.test_durations.clone(),
        }
    }
}

/// Reads and writes the baseline document
#[derive(Clone, Debug)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<BaselineRecord> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open baseline: {}", self.path.display()))?;
        let reader = BufReader::new(file);
        let record: BaselineRecord =
            serde_json::from_reader(reader).context("Failed to parse baseline")?;

        debug!("Loaded baseline from {}", self.path.display());
        Ok(record)
    }

    /// Replace the baseline atomically
    pub fn save(&self, record: &BaselineRecord) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        write_atomic(&dir, &self.path, record)?;
        info!("Saved baseline to {}", self.path.display());
        Ok(())
    }
}
