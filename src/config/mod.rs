//! Configuration module
//!
//! Effective configuration is built from defaults, a config file,
//! `TEST_ORCH_*` environment variables and command line flags, in increasing
//! order of precedence.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::FingerprintCache;
use crate::executor::{FailureClassifier, FailureKind, RetryPolicy, SupervisorConfig};
use crate::monitor::MonitorConfig;

/// Orchestrator configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wall-clock budget per attempt; unset runs without supervision
    pub timeout_secs: Option<u64>,

    /// Attempts after the first one
    pub max_retries: u32,

    /// Base delay between attempts
    pub retry_delay_secs: f64,

    pub exponential_backoff: bool,

    /// Retry runs that report failed tests
    pub retry_on_failure: bool,

    /// Ignore cached results
    pub force_cache: bool,

    pub track_memory: bool,
    pub track_cpu: bool,

    /// Baseline document used for regression comparison
    pub baseline_path: Option<PathBuf>,

    /// Percent change that counts as a regression or improvement
    pub regression_threshold: f64,

    /// Fingerprint cache directory
    pub cache_dir: Option<PathBuf>,

    pub supervisor: SupervisorSettings,
    pub monitor: MonitorSettings,

    /// Extra failure classification rules (message substring -> kind)
    pub classification: BTreeMap<String, FailureKind>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_retries: 3,
            retry_delay_secs: 1.0,
            exponential_backoff: false,
            retry_on_failure: false,
            force_cache: false,
            track_memory: true,
            track_cpu: false,
            baseline_path: None,
            regression_threshold: 5.0,
            cache_dir: None,
            supervisor: SupervisorSettings::default(),
            monitor: MonitorSettings::default(),
            classification: BTreeMap::new(),
        }
    }
}

/// Supervisor timing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub grace_period_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            heartbeat_interval_secs: 30,
            grace_period_ms: 5000,
        }
    }
}

/// Resource monitor timing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub sample_interval_ms: u64,
    pub liveness_check_secs: u64,
    pub max_duration_secs: u64,
    pub stop_timeout_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            liveness_check_secs: 5,
            max_duration_secs: 30 * 60,
            stop_timeout_ms: 2000,
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings that cannot be turned into a working orchestrator
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == Some(0) {
            bail!("timeout_secs must be greater than zero");
        }
        if !self.retry_delay_secs.is_finite() || self.retry_delay_secs < 0.0 {
            bail!(
                "retry_delay_secs must be a non-negative number, got {}",
                self.retry_delay_secs
            );
        }
        if !self.regression_threshold.is_finite() || self.regression_threshold < 0.0 {
            bail!(
                "regression_threshold must be a non-negative number, got {}",
                self.regression_threshold
            );
        }

        for (name, value) in [
            ("supervisor.poll_interval_ms", self.supervisor.poll_interval_ms),
            (
                "supervisor.heartbeat_interval_secs",
                self.supervisor.heartbeat_interval_secs,
            ),
            ("monitor.sample_interval_ms", self.monitor.sample_interval_ms),
            ("monitor.liveness_check_secs", self.monitor.liveness_check_secs),
            ("monitor.max_duration_secs", self.monitor.max_duration_secs),
            ("monitor.stop_timeout_ms", self.monitor.stop_timeout_ms),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.max_retries)
            .base_delay(Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or(Duration::ZERO))
            .exponential(self.exponential_backoff)
            .retry_on_failure(self.retry_on_failure)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new()
            .poll_interval(Duration::from_millis(self.supervisor.poll_interval_ms))
            .heartbeat_interval(Duration::from_secs(self.supervisor.heartbeat_interval_secs))
            .grace_period(Duration::from_millis(self.supervisor.grace_period_ms))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .sample_interval(Duration::from_millis(self.monitor.sample_interval_ms))
            .liveness_interval(Duration::from_secs(self.monitor.liveness_check_secs))
            .max_duration(Duration::from_secs(self.monitor.max_duration_secs))
            .stop_timeout(Duration::from_millis(self.monitor.stop_timeout_ms))
            .track_memory(self.track_memory)
            .track_cpu(self.track_cpu)
    }

    pub fn cache(&self) -> FingerprintCache {
        let dir = self
            .cache_dir
            .clone()
            .unwrap_or_else(FingerprintCache::default_dir);
        FingerprintCache::new(dir).with_forced_invalidation(self.force_cache)
    }

    pub fn classifier(&self) -> FailureClassifier {
        FailureClassifier::with_rules(&self.classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_secs, 1.0);
        assert_eq!(config.regression_threshold, 5.0);
        assert!(config.track_memory);
        assert!(!config.track_cpu);
        assert!(config.timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_timeout = OrchestratorConfig {
            timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let negative_delay = OrchestratorConfig {
            retry_delay_secs: -1.0,
            ..Default::default()
        };
        assert!(negative_delay.validate().is_err());

        let nan_threshold = OrchestratorConfig {
            regression_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(nan_threshold.validate().is_err());

        let mut zero_interval = OrchestratorConfig::default();
        zero_interval.monitor.sample_interval_ms = 0;
        let err = zero_interval.validate().unwrap_err();
        assert!(err.to_string().contains("monitor.sample_interval_ms"));
    }

    #[test]
    fn test_runtime_conversions() {
        let config = OrchestratorConfig {
            timeout_secs: Some(90),
            max_retries: 5,
            retry_delay_secs: 0.5,
            exponential_backoff: true,
            track_cpu: true,
            ..Default::default()
        };

        assert_eq!(config.timeout(), Some(Duration::from_secs(90)));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert!(policy.exponential);

        let monitor = config.monitor_config();
        assert!(monitor.metrics.cpu);
        assert_eq!(monitor.sample_interval, Duration::from_millis(500));

        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_classification_rules_extend_builtin() {
        let mut config = OrchestratorConfig::default();
        config
            .classification
            .insert("database is starting".into(), FailureKind::Transient);

        let classifier = config.classifier();
        assert_eq!(
            classifier.classify_message("Database is starting up"),
            FailureKind::Transient
        );
    }
}
