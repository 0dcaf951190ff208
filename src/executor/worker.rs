//! Isolated worker
//!
//! Workloads run on a dedicated OS thread so the supervisor can walk away from
//! them on timeout. Anything the workload needs from its surroundings
//! (cancellation flag, output sink, child process registration) comes through
//! [`WorkerContext`].

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::classify::FailureClassifier;
use super::error::{ExecutionError, FailureKind, SetupFailure};
use super::workload::Workload;
use crate::models::{TestInvocation, TestResult};
use crate::monitor::ProcessTarget;
use crate::output::{NullSink, OutputSink, Stream};

/// Interval between exit checks while reaping a registered child
const REAP_POLL: Duration = Duration::from_millis(10);

/// Signal sent to a registered child process group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildSignal {
    /// Ask the child to exit (SIGTERM)
    Terminate,
    /// Force the child to exit (SIGKILL)
    Kill,
}

/// State shared between a worker and its supervisor
#[derive(Clone)]
pub struct WorkerContext {
    cancelled: Arc<AtomicBool>,
    // Held while signalling and while reaping, so a signal never reaches a
    // pid that has already been reaped and possibly reused.
    child: Arc<Mutex<Option<u32>>>,
    target: ProcessTarget,
    sink: Arc<dyn OutputSink>,
}

impl WorkerContext {
    pub fn new(target: ProcessTarget, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
            target,
            sink,
        }
    }

    /// Context that targets the current process and discards output
    pub fn detached() -> Self {
        Self::new(ProcessTarget::current(), Arc::new(NullSink))
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the supervisor asked the workload to stop.
    ///
    /// Long running in-process workloads should poll this between tests.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn child_slot(&self) -> MutexGuard<'_, Option<u32>> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a spawned child process; the resource monitor follows it.
    ///
    /// The child is expected to lead its own process group.
    pub fn register_child(&self, pid: u32) {
        *self.child_slot() = Some(pid);
        self.target.retarget(pid);
        debug!(pid, "Registered workload child process");
    }

    /// Wait for a registered child to exit.
    ///
    /// The registration is dropped in the same critical section that reaps
    /// the child, so [`signal_child`](Self::signal_child) cannot race a
    /// recycled pid.
    pub fn reap_child(&self, child: &mut Child) -> io::Result<ExitStatus> {
        loop {
            let mut slot = self.child_slot();
            if let Some(status) = child.try_wait()? {
                *slot = None;
                drop(slot);
                self.target.retarget(std::process::id());
                return Ok(status);
            }
            drop(slot);
            thread::sleep(REAP_POLL);
        }
    }

    pub fn child_pid(&self) -> Option<u32> {
        *self.child_slot()
    }

    pub fn emit(&self, stream: Stream, line: &str) {
        self.sink.write_line(stream, line);
    }

    /// Signal the registered child's process group, if any.
    /// Returns whether a signal was sent.
    pub fn signal_child(&self, signal: ChildSignal) -> bool {
        let slot = self.child_slot();
        match *slot {
            Some(pid) => send_signal(pid, signal),
            None => false,
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: ChildSignal) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        ChildSignal::Terminate => Signal::SIGTERM,
        ChildSignal::Kill => Signal::SIGKILL,
    };

    // The child was spawned as a group leader, so its pid is the pgid and
    // wrappers like `sh -c` or `make` take their descendants down with them.
    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) => {
            debug!(pgid = pid, signal = ?sig, "Signalled workload process group");
            true
        }
        Err(e) => {
            warn!(pgid = pid, "Failed to signal workload process group: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: ChildSignal) -> bool {
    warn!(pid, ?signal, "Signalling child processes is not supported on this platform");
    false
}

/// Run a workload, turning errors, panics and inconsistent results into
/// classified worker faults
pub(crate) fn run_guarded(
    workload: &dyn Workload,
    invocation: &TestInvocation,
    ctx: &WorkerContext,
    classifier: &FailureClassifier,
) -> Result<TestResult, ExecutionError> {
    match panic::catch_unwind(AssertUnwindSafe(|| workload.run(invocation, ctx))) {
        Ok(Ok(result)) => match result.validate() {
            Ok(()) => Ok(result),
            Err(e) => Err(ExecutionError::worker_fault(
                format!("{} returned an inconsistent result: {}", workload.name(), e),
                FailureKind::Unknown,
            )),
        },
        Ok(Err(e)) if e.chain().any(|cause| cause.is::<SetupFailure>()) => {
            Err(ExecutionError::Setup {
                cause: format!("{:#}", e),
            })
        }
        Ok(Err(e)) => Err(ExecutionError::worker_fault(
            format!("{:#}", e),
            classifier.classify(&e),
        )),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            Err(ExecutionError::worker_fault(
                format!("{} panicked: {}", workload.name(), message),
                classifier.classify_message(&message),
            ))
        }
    }
}

/// Start the workload on its own thread.
///
/// The outcome arrives on the returned channel. If the worker is abandoned the
/// thread keeps running until the workload returns; its late outcome is dropped.
pub(crate) fn spawn_worker(
    workload: Arc<dyn Workload>,
    invocation: TestInvocation,
    ctx: WorkerContext,
    classifier: Arc<FailureClassifier>,
) -> io::Result<oneshot::Receiver<Result<TestResult, ExecutionError>>> {
    let (tx, rx) = oneshot::channel();
    let name = format!("worker-{}", workload.name());

    thread::Builder::new().name(name).spawn(move || {
        let outcome = run_guarded(workload.as_ref(), &invocation, &ctx, &classifier);
        if tx.send(outcome).is_err() {
            debug!("Supervisor no longer waiting for worker outcome");
        }
    })?;

    Ok(rx)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FnWorkload;
    use crate::output::BufferSink;

    fn guarded(workload: &dyn Workload) -> Result<TestResult, ExecutionError> {
        run_guarded(
            workload,
            &TestInvocation::default(),
            &WorkerContext::detached(),
            FailureClassifier::builtin(),
        )
    }

    #[test]
    fn test_panic_becomes_worker_fault() {
        let workload = FnWorkload::new("boom", |_, _| panic!("fixture exploded"));
        match guarded(&workload) {
            Err(ExecutionError::WorkerFault { cause, kind }) => {
                assert!(cause.contains("fixture exploded"));
                assert_eq!(kind, FailureKind::Unknown);
            }
            other => panic!("expected worker fault, got {:?}", other),
        }
    }

    #[test]
    fn test_error_is_classified() {
        let workload = FnWorkload::new("denied", |_, _| {
            Err(anyhow::anyhow!("Access denied to test assembly"))
        });
        assert_eq!(guarded(&workload).unwrap_err().kind(), FailureKind::Fatal);
    }

    #[test]
    fn test_setup_failure_is_not_a_worker_fault() {
        let workload = FnWorkload::new("missing", |_, _| {
            Err(anyhow::Error::new(SetupFailure("Test command not found: pytest".into()))
                .context("Preparing test run"))
        });
        match guarded(&workload) {
            Err(ExecutionError::Setup { cause }) => assert!(cause.contains("pytest")),
            other => panic!("expected setup failure, got {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_result_is_rejected() {
        let workload = FnWorkload::new("liar", |_, _| {
            let mut result = TestResult::from_counts(3, 0, 0, 10);
            result.total = 5;
            Ok(result)
        });
        assert!(matches!(
            guarded(&workload),
            Err(ExecutionError::WorkerFault { .. })
        ));
    }

    #[test]
    fn test_context_cancellation_and_child_registration() {
        let target = ProcessTarget::new(1);
        let ctx = WorkerContext::new(target.clone(), Arc::new(NullSink));
        assert!(!ctx.is_cancelled());
        assert!(!ctx.signal_child(ChildSignal::Terminate));

        ctx.clone().cancel();
        assert!(ctx.is_cancelled());

        ctx.register_child(4242);
        assert_eq!(ctx.child_pid(), Some(4242));
        assert_eq!(target.pid(), 4242);
    }

    #[cfg(unix)]
    #[test]
    fn test_reap_clears_registration_with_the_exit() {
        let target = ProcessTarget::new(1);
        let ctx = WorkerContext::new(target.clone(), Arc::new(NullSink));

        let mut child = std::process::Command::new("true").spawn().unwrap();
        ctx.register_child(child.id());
        assert_eq!(ctx.child_pid(), Some(child.id()));

        let status = ctx.reap_child(&mut child).unwrap();
        assert!(status.success());
        assert_eq!(ctx.child_pid(), None);
        assert_eq!(target.pid(), std::process::id());
        assert!(!ctx.signal_child(ChildSignal::Kill));
    }

    #[test]
    fn test_emit_goes_to_injected_sink() {
        let sink = Arc::new(BufferSink::new());
        let ctx = WorkerContext::new(ProcessTarget::current(), sink.clone());
        ctx.emit(Stream::Stdout, "running 3 tests");
        assert_eq!(sink.contents(Stream::Stdout), "running 3 tests");
    }

    #[tokio::test]
    async fn test_spawned_worker_reports_outcome() {
        let workload: Arc<dyn Workload> = Arc::new(FnWorkload::new("ok", |_, _| {
            Ok(TestResult::from_counts(2, 0, 0, 5))
        }));
        let rx = spawn_worker(
            workload,
            TestInvocation::default(),
            WorkerContext::detached(),
            Arc::new(FailureClassifier::default()),
        )
        .unwrap();

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.passed, 2);
    }
}
