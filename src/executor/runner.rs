//! Orchestrated test runs
//!
//! Ties the pieces together for one run: cache lookup, supervised execution
//! with retries, cache update, report and baseline comparison.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{ExecutionError, RunError};
use super::retry::{AttemptRecord, RetryCoordinator};
use super::supervisor::{ExecutionSupervisor, SupervisedRun};
use crate::cache::{CacheEntry, CacheLookup, FingerprintCache};
use crate::config::OrchestratorConfig;
use crate::models::{PerformanceSummary, TestResult, WorkSpec};
use crate::monitor::ResourceMonitor;
use crate::output::{OutputSink, Stream};
use crate::results::{
    compare_to_baseline, summarize, BaselineStore, RegressionComparison, Report,
};
use crate::utils::Stopwatch;

/// Everything a finished run produced
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub result: TestResult,
    pub performance: Option<PerformanceSummary>,
    pub report: Report,
    pub comparison: Option<RegressionComparison>,
    pub from_cache: bool,
    pub history: Vec<AttemptRecord>,
}

impl RunOutcome {
    /// 0 when every test passed, 1 when any failed
    pub fn exit_code(&self) -> u8 {
        if self.result.has_failures() {
            1
        } else {
            0
        }
    }
}

/// Runs work specs
pub struct Orchestrator {
    cache: Option<FingerprintCache>,
    retry: RetryCoordinator,
    supervisor: ExecutionSupervisor,
    timeout: Option<Duration>,
    baseline: Option<BaselineStore>,
    regression_threshold: f64,
}

impl Orchestrator {
    pub fn new(supervisor: ExecutionSupervisor, retry: RetryCoordinator) -> Self {
        Self {
            cache: None,
            retry,
            supervisor,
            timeout: None,
            baseline: None,
            regression_threshold: 5.0,
        }
    }

    /// Build an orchestrator from validated configuration
    pub fn from_config(config: &OrchestratorConfig, sink: Arc<dyn OutputSink>) -> Self {
        let supervisor = ExecutionSupervisor::new(config.supervisor_config())
            .with_monitor(ResourceMonitor::new(config.monitor_config()))
            .with_classifier(Arc::new(config.classifier()))
            .with_sink(Arc::clone(&sink));

        let retry = RetryCoordinator::new(config.retry_policy()).on_retry(move |attempt, failure| {
            sink.write_line(
                Stream::Stderr,
                &format!("Retrying (attempt {}) after: {}", attempt, failure),
            );
        });

        let mut orchestrator = Self::new(supervisor, retry)
            .with_cache(config.cache())
            .with_timeout(config.timeout());
        if let Some(path) = &config.baseline_path {
            orchestrator =
                orchestrator.with_baseline(BaselineStore::new(path), config.regression_threshold);
        }
        orchestrator
    }

    pub fn with_cache(mut self, cache: FingerprintCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_baseline(mut self, store: BaselineStore, threshold_percent: f64) -> Self {
        self.baseline = Some(store);
        self.regression_threshold = threshold_percent;
        self
    }

    /// Run a work spec.
    ///
    /// Failed tests are a normal outcome; only execution failures are errors.
    pub async fn run(&self, spec: &WorkSpec) -> Result<RunOutcome, RunError> {
        let mut stopwatch = Stopwatch::new();
        info!("Running {} ({} inputs)", spec.name(), spec.inputs().len());

        if let Some(entry) = self.cached(spec) {
            stopwatch.lap("cache lookup");
            info!(
                "Inputs unchanged since {}, using cached result",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
            let report = summarize(&entry.result, None);
            let comparison = self.compare(&report);
            return Ok(RunOutcome {
                result: entry.result,
                performance: None,
                report,
                comparison,
                from_cache: true,
                history: Vec::new(),
            });
        }
        stopwatch.lap("cache lookup");

        let (run, history) = self.execute(spec).await?;
        stopwatch.lap("execution");

        if let Some(cache) = &self.cache {
            if spec.inputs().is_empty() {
                debug!("No inputs declared, result not cached");
            } else if run.result.has_failures() {
                debug!("Result has failed tests, not caching it");
            } else {
                cache.store(spec.inputs(), &run.result);
            }
        }

        let report = summarize(&run.result, run.performance.as_ref());
        let comparison = self.compare(&report);
        stopwatch.lap("report");

        info!(
            "{} finished: {}/{} passed ({:.1}%) after {} attempt(s)",
            spec.name(),
            run.result.passed,
            run.result.total,
            report.success_rate,
            history.len()
        );
        debug!("Phase timings:\n{}", stopwatch.format());

        Ok(RunOutcome {
            result: run.result,
            performance: run.performance,
            report,
            comparison,
            from_cache: false,
            history,
        })
    }

    fn cached(&self, spec: &WorkSpec) -> Option<CacheEntry> {
        let cache = self.cache.as_ref()?;
        if spec.inputs().is_empty() {
            return None;
        }

        match cache.lookup(spec.inputs()) {
            CacheLookup::Hit(entry) => Some(*entry),
            CacheLookup::Miss(reason) => {
                debug!("Cache miss: {}", reason);
                None
            }
        }
    }

    async fn execute(
        &self,
        spec: &WorkSpec,
    ) -> Result<(SupervisedRun, Vec<AttemptRecord>), RunError> {
        let workload = spec.workload();
        let retry_on_failure = self.retry.policy().retry_on_failure;

        let outcome = self
            .retry
            .execute(|attempt| {
                let workload = Arc::clone(&workload);
                async move {
                    debug!(attempt, "Supervising {}", spec.name());
                    let run = self
                        .supervisor
                        .run(workload, spec.invocation(), self.timeout)
                        .await?;

                    if retry_on_failure && run.result.has_failures() {
                        return Err(ExecutionError::TestsFailed {
                            failed: run.result.failed,
                            total: run.result.total,
                            run: Box::new(run),
                        });
                    }
                    Ok(run)
                }
            })
            .await;

        match outcome {
            Ok(outcome) => Ok((outcome.value, outcome.history)),
            Err(RunError::ExhaustedRetries {
                attempts,
                last_failure: ExecutionError::TestsFailed { run, .. },
                history,
            }) => {
                warn!("Tests still failing after {} attempts", attempts);
                Ok((*run, history))
            }
            Err(e) => Err(e),
        }
    }

    /// Compare against the baseline; a missing or unreadable baseline only
    /// skips the comparison
    fn compare(&self, report: &Report) -> Option<RegressionComparison> {
        let store = self.baseline.as_ref()?;
        if !store.exists() {
            warn!(
                "Baseline {} not found, skipping comparison",
                store.path().display()
            );
            return None;
        }

        match store.load() {
            Ok(baseline) => Some(compare_to_baseline(
                report,
                &baseline,
                self.regression_threshold,
            )),
            Err(e) => {
                warn!("Failed to load baseline, skipping comparison: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FailureKind, FnWorkload, RetryPolicy, SupervisorConfig, Workload};
    use crate::models::{TestRecord, TestResult};
    use crate::results::BaselineRecord;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct Fixture {
        dir: tempfile::TempDir,
        inputs: Vec<PathBuf>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let inputs: Vec<PathBuf> = ["lib_test.rs", "parser_test.rs"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, format!("// {name}")).unwrap();
                path
            })
            .collect();
        Fixture { dir, inputs }
    }

    fn orchestrator(cache_dir: &Path, max_retries: u32) -> Orchestrator {
        Orchestrator::new(
            ExecutionSupervisor::new(SupervisorConfig::default()),
            RetryCoordinator::new(
                RetryPolicy::new()
                    .max_retries(max_retries)
                    .base_delay(Duration::ZERO),
            ),
        )
        .with_cache(FingerprintCache::new(cache_dir))
    }

    fn counting(calls: Arc<AtomicU32>, result: TestResult) -> Arc<dyn Workload> {
        Arc::new(FnWorkload::new("counting", move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(result.clone())
        }))
    }

    #[tokio::test]
    async fn test_second_run_with_unchanged_inputs_uses_cache() {
        let fx = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let spec = WorkSpec::new(
            "suite",
            counting(Arc::clone(&calls), TestResult::from_counts(10, 0, 0, 50)),
        )
        .with_inputs(fx.inputs.clone());
        let orchestrator = orchestrator(&fx.dir.path().join("cache"), 3);

        let first = orchestrator.run(&spec).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.result.total, 10);
        assert_eq!(first.exit_code(), 0);

        let second = orchestrator.run(&spec).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.result, first.result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        std::fs::write(&fx.inputs[0], "// changed").unwrap();
        let third = orchestrator.run(&spec).await.unwrap();
        assert!(!third.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let fx = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let workload: Arc<dyn Workload> = Arc::new(FnWorkload::new("flaky", move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("The file is being used by another process");
            }
            Ok(TestResult::from_counts(4, 0, 0, 10))
        }));
        let spec = WorkSpec::new("flaky", workload).with_inputs(fx.inputs.clone());

        let outcome = orchestrator(&fx.dir.path().join("cache"), 3)
            .run(&spec)
            .await
            .unwrap();

        assert_eq!(outcome.result.passed, 4);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.history[0].kind, Some(FailureKind::Transient));
        assert!(!outcome.history[2].is_failure());
    }

    #[tokio::test]
    async fn test_fatal_failure_surfaces_immediately() {
        let fx = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let workload: Arc<dyn Workload> = Arc::new(FnWorkload::new("denied", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "tests dir").into())
        }));
        let spec = WorkSpec::new("denied", workload).with_inputs(fx.inputs.clone());

        let err = orchestrator(&fx.dir.path().join("cache"), 3)
            .run(&spec)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Fatal { .. }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_attempts_never_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let (running, highest, counter) = (in_flight.clone(), peak.clone(), calls.clone());
        let workload: Arc<dyn Workload> = Arc::new(FnWorkload::new("stubborn", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(600));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(TestResult::from_counts(1, 0, 0, 600))
        }));

        let orchestrator = Orchestrator::new(
            ExecutionSupervisor::new(
                SupervisorConfig::new()
                    .poll_interval(Duration::from_millis(10))
                    .grace_period(Duration::from_millis(50)),
            ),
            RetryCoordinator::new(RetryPolicy::new().max_retries(2).base_delay(Duration::ZERO)),
        )
        .with_timeout(Some(Duration::from_millis(100)));

        let err = orchestrator
            .run(&WorkSpec::new("stubborn", workload))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Fatal { .. }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.history().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(peak.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_missing_test_command_is_a_setup_error() {
        let fx = fixture();
        let workload: Arc<dyn Workload> =
            Arc::new(crate::executor::CommandWorkload::new("no-such-test-runner-xyz"));
        let spec = WorkSpec::new("missing", workload).with_inputs(fx.inputs.clone());

        let err = orchestrator(&fx.dir.path().join("cache"), 3)
            .run(&spec)
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.history().len(), 1);
        assert!(matches!(
            err.last_failure(),
            Some(ExecutionError::Setup { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_tests_are_reported_not_cached() {
        let fx = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let result = TestResult::from_records(
            vec![
                TestRecord::passed("ok", 5),
                TestRecord::failed("broken", 7, "assertion failed"),
            ],
            12,
        );
        let spec = WorkSpec::new("failing", counting(Arc::clone(&calls), result))
            .with_inputs(fx.inputs.clone());
        let orchestrator = orchestrator(&fx.dir.path().join("cache"), 3);

        let outcome = orchestrator.run(&spec).await.unwrap();
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let again = orchestrator.run(&spec).await.unwrap();
        assert!(!again.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_on_failure_returns_last_result_when_exhausted() {
        let fx = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let spec = WorkSpec::new(
            "still-failing",
            counting(Arc::clone(&calls), TestResult::from_counts(1, 1, 0, 3)),
        );
        let orchestrator = Orchestrator::new(
            ExecutionSupervisor::default(),
            RetryCoordinator::new(
                RetryPolicy::new()
                    .max_retries(2)
                    .base_delay(Duration::ZERO)
                    .retry_on_failure(true),
            ),
        )
        .with_cache(FingerprintCache::new(fx.dir.path().join("cache")));

        let outcome = orchestrator.run(&spec).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.result.failed, 1);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_comparison_against_baseline() {
        let fx = fixture();
        let baseline_path = fx.dir.path().join("baseline.json");
        let baseline_report = summarize(&TestResult::from_counts(2, 0, 0, 100_000), None);
        BaselineStore::new(&baseline_path)
            .save(&BaselineRecord::from_report(&baseline_report))
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let spec = WorkSpec::new(
            "slower",
            counting(calls, TestResult::from_counts(2, 0, 0, 110_000)),
        );
        let outcome = orchestrator(&fx.dir.path().join("cache"), 0)
            .with_baseline(BaselineStore::new(&baseline_path), 5.0)
            .run(&spec)
            .await
            .unwrap();

        let comparison = outcome.comparison.unwrap();
        assert!(comparison.is_regression);
        assert!((comparison.duration_change_percent - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_baseline_skips_comparison() {
        let fx = fixture();
        let spec = WorkSpec::new(
            "no-baseline",
            counting(Arc::new(AtomicU32::new(0)), TestResult::from_counts(1, 0, 0, 1)),
        );
        let outcome = orchestrator(&fx.dir.path().join("cache"), 0)
            .with_baseline(BaselineStore::new(fx.dir.path().join("missing.json")), 5.0)
            .run(&spec)
            .await
            .unwrap();
        assert!(outcome.comparison.is_none());
    }

    #[tokio::test]
    async fn test_from_config_runs_supervised() {
        let fx = fixture();
        let mut config = OrchestratorConfig {
            timeout_secs: Some(5),
            cache_dir: Some(fx.dir.path().join("cache")),
            track_memory: false,
            ..Default::default()
        };
        config.supervisor.poll_interval_ms = 10;

        let orchestrator = Orchestrator::from_config(&config, Arc::new(crate::output::NullSink));
        let spec = WorkSpec::new(
            "configured",
            counting(Arc::new(AtomicU32::new(0)), TestResult::from_counts(3, 0, 0, 1)),
        )
        .with_inputs(fx.inputs.clone());

        let outcome = orchestrator.run(&spec).await.unwrap();
        assert_eq!(outcome.result.passed, 3);
        assert!(outcome.performance.is_none());
    }
}
