//! Resource monitor
//!
//! Samples memory and CPU usage of a running workload from a background task
//! and reduces the samples into a [`PerformanceSummary`] when stopped.
//!
//! The sampling task ends on its own when the target process disappears or
//! after a hard ceiling, whichever comes first.

mod probe;

pub use probe::{MetricSelection, ProcessProbe, ProcessTarget, SysinfoProbe};

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::models::{PerformanceSample, PerformanceSummary};

/// Resource monitor configuration
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Interval between samples
    pub sample_interval: Duration,

    /// Minimum interval between target liveness checks
    pub liveness_interval: Duration,

    /// Hard ceiling on monitoring time
    pub max_duration: Duration,

    /// How long `stop` waits for the sampling task
    pub stop_timeout: Duration,

    /// Metrics to collect
    pub metrics: MetricSelection,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            liveness_interval: Duration::from_secs(5),
            max_duration: Duration::from_secs(30 * 60),
            stop_timeout: Duration::from_secs(2),
            metrics: MetricSelection {
                memory: true,
                cpu: false,
            },
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn stop_timeout(mut self, duration: Duration) -> Self {
        self.stop_timeout = duration;
        self
    }

    pub fn track_memory(mut self, enabled: bool) -> Self {
        self.metrics.memory = enabled;
        self
    }

    pub fn track_cpu(mut self, enabled: bool) -> Self {
        self.metrics.cpu = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.metrics.any()
    }
}

/// Why the sampling loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopCause {
    Requested,
    TargetGone,
    Ceiling,
}

/// Starts sampling tasks
#[derive(Clone, Debug, Default)]
pub struct ResourceMonitor {
    config: MonitorConfig,
}

impl ResourceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start sampling `target` with the sysinfo probe
    pub fn start(&self, target: ProcessTarget) -> MonitorHandle {
        self.start_with_probe(target, Box::new(SysinfoProbe::new()))
    }

    /// Start sampling `target` with a custom probe.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_probe(
        &self,
        target: ProcessTarget,
        probe: Box<dyn ProcessProbe>,
    ) -> MonitorHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let config = self.config.clone();

        info!(
            pid = target.pid(),
            interval_ms = config.sample_interval.as_millis() as u64,
            "Resource monitor started"
        );

        let task = tokio::spawn(sample_loop(target, config.clone(), probe, stop_rx));

        MonitorHandle {
            stop_tx: Some(stop_tx),
            task,
            stop_timeout: config.stop_timeout,
        }
    }
}

/// Handle to a running sampling task
pub struct MonitorHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<PerformanceSummary>,
    stop_timeout: Duration,
}

impl MonitorHandle {
    /// Whether the sampling task already ended on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop sampling and collect the summary.
    ///
    /// Waits at most the configured stop timeout; if the task does not answer
    /// in time it is aborted and an empty summary is returned.
    pub async fn stop(mut self) -> PerformanceSummary {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have ended on its own.
            let _ = stop_tx.send(());
        }

        match timeout(self.stop_timeout, &mut self.task).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                warn!("Resource monitor task failed: {}", e);
                PerformanceSummary::empty()
            }
            Err(_) => {
                warn!(
                    "Resource monitor did not stop within {}ms, discarding samples",
                    self.stop_timeout.as_millis()
                );
                self.task.abort();
                PerformanceSummary::empty()
            }
        }
    }
}

async fn sample_loop(
    target: ProcessTarget,
    config: MonitorConfig,
    mut probe: Box<dyn ProcessProbe>,
    mut stop_rx: oneshot::Receiver<()>,
) -> PerformanceSummary {
    let started = Instant::now();
    let mut last_liveness_check = started;
    let mut samples: Vec<PerformanceSample> = Vec::new();
    let mut ticker = interval(config.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let cause = loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break StopCause::Requested,

            _ = ticker.tick() => {
                if started.elapsed() >= config.max_duration {
                    break StopCause::Ceiling;
                }

                let pid = target.pid();
                if last_liveness_check.elapsed() >= config.liveness_interval {
                    last_liveness_check = Instant::now();
                    if !probe.is_alive(pid) {
                        break StopCause::TargetGone;
                    }
                }

                let sample = probe.sample(pid, config.metrics);
                if sample.is_blank() {
                    debug!(pid, "No metrics available for this sample");
                }
                samples.push(sample);
            }
        }
    };

    match cause {
        StopCause::Requested => debug!(samples = samples.len(), "Resource monitor stopped"),
        StopCause::TargetGone => info!(
            pid = target.pid(),
            samples = samples.len(),
            "Monitored process exited, resource monitor stopping"
        ),
        StopCause::Ceiling => warn!(
            limit_secs = config.max_duration.as_secs(),
            "Resource monitor reached its time ceiling"
        ),
    }

    PerformanceSummary::from_samples(&samples)
}
