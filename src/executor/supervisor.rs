//! Execution supervisor
//!
//! Runs a workload under an optional wall-clock budget. With a budget the
//! workload runs on an isolated worker thread; the supervisor polls for its
//! outcome, logs heartbeats and cancels it in two phases when time runs out.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::classify::FailureClassifier;
use super::error::{ExecutionError, FailureKind};
use super::worker::{run_guarded, spawn_worker, ChildSignal, WorkerContext};
use super::workload::Workload;
use crate::models::{PerformanceSummary, TestInvocation, TestResult};
use crate::monitor::{MonitorHandle, ProcessTarget, ResourceMonitor};
use crate::output::{NullSink, OutputSink};

/// Supervisor timing configuration
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// How often to check for worker completion
    pub poll_interval: Duration,

    /// How often to log a progress heartbeat
    pub heartbeat_interval: Duration,

    /// Time between cooperative and forced cancellation
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Successful supervised execution
#[derive(Clone, Debug)]
pub struct SupervisedRun {
    pub result: TestResult,
    /// Present when resource tracking was enabled
    pub performance: Option<PerformanceSummary>,
    pub elapsed: Duration,
}

type WorkerOutcome = Result<TestResult, ExecutionError>;

/// Runs workloads with timeout enforcement and resource monitoring
pub struct ExecutionSupervisor {
    config: SupervisorConfig,
    monitor: Option<ResourceMonitor>,
    classifier: Arc<FailureClassifier>,
    sink: Arc<dyn OutputSink>,
}

impl ExecutionSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            monitor: None,
            classifier: Arc::new(FailureClassifier::default()),
            sink: Arc::new(NullSink),
        }
    }

    /// Sample resources while the workload runs. A monitor with no metrics
    /// selected is ignored.
    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = monitor.config().is_enabled().then_some(monitor);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run the workload once.
    ///
    /// Without a budget the workload runs in the caller's context. With a
    /// budget it either finishes in time or the call fails with
    /// [`ExecutionError::Timeout`]; a partial result is never returned.
    pub async fn run(
        &self,
        workload: Arc<dyn Workload>,
        invocation: &TestInvocation,
        budget: Option<Duration>,
    ) -> Result<SupervisedRun, ExecutionError> {
        let target = ProcessTarget::current();
        let ctx = WorkerContext::new(target.clone(), Arc::clone(&self.sink));
        let monitor = self.monitor.as_ref().map(|m| m.start(target));
        let started = Instant::now();

        let outcome = match budget {
            None => {
                debug!(workload = workload.name(), "Running workload without time budget");
                run_in_place(|| run_guarded(workload.as_ref(), invocation, &ctx, &self.classifier))
            }
            Some(limit) => self.run_bounded(workload, invocation, &ctx, limit).await,
        };

        let performance = stop_monitor(monitor).await;
        let elapsed = started.elapsed();

        outcome.map(|result| SupervisedRun {
            result,
            performance,
            elapsed,
        })
    }

    async fn run_bounded(
        &self,
        workload: Arc<dyn Workload>,
        invocation: &TestInvocation,
        ctx: &WorkerContext,
        limit: Duration,
    ) -> WorkerOutcome {
        let name = workload.name().to_string();
        let mut rx = spawn_worker(
            workload,
            invocation.clone(),
            ctx.clone(),
            Arc::clone(&self.classifier),
        )
        .map_err(|e| {
            ExecutionError::worker_fault(
                format!("Failed to start worker thread: {}", e),
                FailureKind::Transient,
            )
        })?;

        let started = Instant::now();
        let deadline = started + limit;
        let mut next_heartbeat = started + self.config.heartbeat_interval;

        info!(
            workload = %name,
            timeout_secs = limit.as_secs_f64(),
            "Worker started"
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let wake = (now + self.config.poll_interval).min(deadline);
            match timeout_at(wake, &mut rx).await {
                Ok(outcome) => return received(outcome),
                Err(_) => {
                    let now = Instant::now();
                    if now >= next_heartbeat && now < deadline {
                        let elapsed = now - started;
                        info!(
                            workload = %name,
                            elapsed_secs = elapsed.as_secs(),
                            remaining_secs = (deadline - now).as_secs(),
                            "Workload still running"
                        );
                        next_heartbeat += self.config.heartbeat_interval;
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        warn!(
            workload = %name,
            timeout_secs = limit.as_secs_f64(),
            "Workload exceeded its time budget, cancelling"
        );
        let worker_stopped = self.cancel(ctx, &mut rx).await;

        Err(ExecutionError::Timeout {
            elapsed,
            worker_stopped,
        })
    }

    /// Cooperative cancellation first, forced termination after the grace
    /// period. The worker's late outcome is discarded either way.
    ///
    /// Returns whether the worker thread finished. A worker that is still
    /// running afterwards has been abandoned.
    async fn cancel(
        &self,
        ctx: &WorkerContext,
        rx: &mut oneshot::Receiver<WorkerOutcome>,
    ) -> bool {
        let grace = self.config.grace_period;
        ctx.cancel();
        ctx.signal_child(ChildSignal::Terminate);

        if timeout(grace, &mut *rx).await.is_ok() {
            debug!("Worker stopped within the grace period");
            return true;
        }

        if !ctx.signal_child(ChildSignal::Kill) {
            warn!("Worker ignored cancellation, abandoning worker thread");
            return false;
        }

        // The worker still has to notice its child is gone
        if timeout(grace, rx).await.is_ok() {
            warn!("Worker ignored cancellation, killed its child process");
            true
        } else {
            warn!("Worker still running after its child was killed, abandoning worker thread");
            false
        }
    }
}

impl Default for ExecutionSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

fn received(outcome: Result<WorkerOutcome, oneshot::error::RecvError>) -> WorkerOutcome {
    match outcome {
        Ok(outcome) => outcome,
        Err(_) => Err(ExecutionError::worker_fault(
            "Worker exited without reporting an outcome",
            FailureKind::Unknown,
        )),
    }
}

/// Run blocking work on the current task. On a multi-threaded runtime the
/// thread is handed over so other tasks, such as the monitor, keep running.
fn run_in_place<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

async fn stop_monitor(handle: Option<MonitorHandle>) -> Option<PerformanceSummary> {
    match handle {
        Some(handle) => Some(handle.stop().await),
        None => None,
    }
}
