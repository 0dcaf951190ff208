//! Retry coordinator
//!
//! Runs a unit of work up to `max_retries + 1` times, sleeping between
//! attempts, and keeps a history of every attempt for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::{ExecutionError, FailureKind, RunError};

/// Retry configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential: bool,
    /// Also retry results that report failed tests
    pub retry_on_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            exponential: false,
            retry_on_failure: false,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn exponential(mut self, enabled: bool) -> Self {
        self.exponential = enabled;
        self
    }

    pub fn retry_on_failure(mut self, enabled: bool) -> Self {
        self.retry_on_failure = enabled;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `failed_attempt`-th attempt (1-based) failed
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// How an attempt ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
}

/// One entry of the attempt history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl AttemptRecord {
    fn succeeded(attempt: u32) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            status: AttemptStatus::Succeeded,
            description: "completed".to_string(),
            kind: None,
        }
    }

    fn failed(attempt: u32, failure: &ExecutionError, kind: FailureKind) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            status: AttemptStatus::Failed,
            description: failure.to_string(),
            kind: Some(kind),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == AttemptStatus::Failed
    }
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}",
            self.attempt,
            self.timestamp.format("%H:%M:%S%.3f"),
            self.description
        )?;
        if let Some(kind) = self.kind {
            write!(f, " [{}]", kind)?;
        }
        Ok(())
    }
}

/// Successful outcome plus the attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub history: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> usize {
        self.history.len()
    }
}

type ClassifyHook = Arc<dyn Fn(&ExecutionError) -> FailureKind + Send + Sync>;
type RetryHook = Arc<dyn Fn(u32, &ExecutionError) + Send + Sync>;

/// Executes work with bounded retries
#[derive(Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    classify: Option<ClassifyHook>,
    on_retry: Option<RetryHook>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classify: None,
            on_retry: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Override the classification carried by the errors themselves
    pub fn with_classifier<F>(mut self, classify: F) -> Self
    where
        F: Fn(&ExecutionError) -> FailureKind + Send + Sync + 'static,
    {
        self.classify = Some(Arc::new(classify));
        self
    }

    /// Recovery action run before every retry with the upcoming attempt number
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &ExecutionError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    fn classify(&self, failure: &ExecutionError) -> FailureKind {
        match &self.classify {
            Some(classify) => classify(failure),
            None => failure.kind(),
        }
    }

    /// Run `work` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// `work` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, mut work: F) -> Result<RetryOutcome<T>, RunError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut history = Vec::new();
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, "Starting attempt");

            let failure = match work(attempt).await {
                Ok(value) => {
                    history.push(AttemptRecord::succeeded(attempt));
                    if attempt > 1 {
                        info!("Succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(RetryOutcome { value, history });
                }
                Err(failure) => failure,
            };

            let kind = self.classify(&failure);
            history.push(AttemptRecord::failed(attempt, &failure, kind));

            if !kind.is_retryable() {
                error!(attempt, "Fatal failure, not retrying: {}", failure);
                return Err(RunError::Fatal { failure, history });
            }

            if attempt >= max_attempts {
                error!(attempts = attempt, "All attempts failed: {}", failure);
                return Err(RunError::ExhaustedRetries {
                    attempts: attempt,
                    last_failure: failure,
                    history,
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed ({}): {}",
                kind,
                failure
            );

            if let Some(hook) = &self.on_retry {
                hook(attempt + 1, &failure);
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn transient(msg: &str) -> ExecutionError {
        ExecutionError::worker_fault(msg, FailureKind::Transient)
    }

    fn quick(max_retries: u32) -> RetryCoordinator {
        RetryCoordinator::new(
            RetryPolicy::new()
                .max_retries(max_retries)
                .base_delay(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_always_failing_makes_max_retries_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = quick(3)
            .execute(|_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient("file is locked")) }
            })
            .await;

        let err = assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            RunError::ExhaustedRetries {
                attempts, history, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(history.len(), 4);
                assert!(history.iter().all(AttemptRecord::is_failure));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_after_two_transient_failures() {
        let outcome = quick(3)
            .execute(|attempt| async move {
                if attempt <= 2 {
                    Err(transient("connection reset"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        let outcome = assert_ok!(outcome);
        assert_eq!(outcome.value, 3);
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.history.iter().filter(|r| r.is_failure()).count(), 2);
        assert_eq!(outcome.history[2].status, AttemptStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = quick(3)
            .execute(|_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ExecutionError::worker_fault(
                        "permission denied",
                        FailureKind::Fatal,
                    ))
                }
            })
            .await;

        let err = assert_err!(result);
        assert!(matches!(err, RunError::Fatal { .. }));
        assert_eq!(err.history().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_failures_are_retried() {
        let outcome = quick(1)
            .execute(|attempt| async move {
                if attempt == 1 {
                    Err(ExecutionError::worker_fault("weird", FailureKind::Unknown))
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(assert_ok!(outcome).attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_doubles_delay() {
        let coordinator = RetryCoordinator::new(
            RetryPolicy::new()
                .max_retries(3)
                .base_delay(Duration::from_secs(1))
                .exponential(true),
        );
        let starts = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&starts);

        let _ = coordinator
            .execute(|_| {
                recorded.lock().unwrap().push(Instant::now());
                async { Err::<(), _>(transient("network")) }
            })
            .await;

        let starts = starts.lock().unwrap();
        let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_and_no_delay_before_first_attempt() {
        let coordinator = RetryCoordinator::new(
            RetryPolicy::new()
                .max_retries(2)
                .base_delay(Duration::from_millis(500)),
        );
        let begin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&starts);

        let _ = coordinator
            .execute(|_| {
                recorded.lock().unwrap().push(Instant::now());
                async { Err::<(), _>(transient("timed out")) }
            })
            .await;

        let starts = starts.lock().unwrap();
        assert_eq!(starts[0], begin);
        assert_eq!(starts[1] - starts[0], Duration::from_millis(500));
        assert_eq!(starts[2] - starts[1], Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_classifier_hook_and_retry_hook() {
        let retries = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&retries);
        let coordinator = quick(3)
            .with_classifier(|failure| {
                if failure.to_string().contains("quota") {
                    FailureKind::Fatal
                } else {
                    FailureKind::Transient
                }
            })
            .on_retry(move |next, _| seen.lock().unwrap().push(next));

        let result = coordinator
            .execute(|attempt| async move {
                if attempt < 3 {
                    Err::<(), _>(transient("flaky"))
                } else {
                    Err(transient("quota exceeded"))
                }
            })
            .await;

        let err = assert_err!(result);
        assert!(matches!(err, RunError::Fatal { .. }));
        assert_eq!(err.history().len(), 3);
        assert_eq!(*retries.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_policy_delays() {
        let policy = RetryPolicy::new().exponential(true);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(RetryPolicy::new().delay_after(3), Duration::from_secs(1));
    }
}
