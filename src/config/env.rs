//! Environment variable configuration
//!
//! Provides `TEST_ORCH_*` overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::OrchestratorConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TEST_ORCH";

/// Overrides read from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// TEST_ORCH_TIMEOUT
    pub timeout: Option<u64>,
    /// TEST_ORCH_MAX_RETRIES
    pub max_retries: Option<u32>,
    /// TEST_ORCH_RETRY_DELAY
    pub retry_delay: Option<f64>,
    /// TEST_ORCH_EXPONENTIAL_BACKOFF
    pub exponential_backoff: Option<bool>,
    /// TEST_ORCH_RETRY_ON_FAILURE
    pub retry_on_failure: Option<bool>,
    /// TEST_ORCH_FORCE_CACHE
    pub force_cache: Option<bool>,
    /// TEST_ORCH_TRACK_MEMORY
    pub track_memory: Option<bool>,
    /// TEST_ORCH_TRACK_CPU
    pub track_cpu: Option<bool>,
    /// TEST_ORCH_BASELINE
    pub baseline: Option<PathBuf>,
    /// TEST_ORCH_REGRESSION_THRESHOLD
    pub regression_threshold: Option<f64>,
    /// TEST_ORCH_CACHE_DIR
    pub cache_dir: Option<PathBuf>,
    /// TEST_ORCH_CONFIG
    pub config_file: Option<PathBuf>,
    /// TEST_ORCH_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            timeout: get_env_parse("TIMEOUT"),
            max_retries: get_env_parse("MAX_RETRIES"),
            retry_delay: get_env_parse("RETRY_DELAY"),
            exponential_backoff: get_env_bool("EXPONENTIAL_BACKOFF"),
            retry_on_failure: get_env_bool("RETRY_ON_FAILURE"),
            force_cache: get_env_bool("FORCE_CACHE"),
            track_memory: get_env_bool("TRACK_MEMORY"),
            track_cpu: get_env_bool("TRACK_CPU"),
            baseline: get_env("BASELINE").map(PathBuf::from),
            regression_threshold: get_env_parse("REGRESSION_THRESHOLD"),
            cache_dir: get_env("CACHE_DIR").map(PathBuf::from),
            config_file: get_env("CONFIG").map(PathBuf::from),
            format: get_env("FORMAT"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Overwrite the settings that are present in the environment
    pub fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay_secs = delay;
        }
        if let Some(enabled) = self.exponential_backoff {
            config.exponential_backoff = enabled;
        }
        if let Some(enabled) = self.retry_on_failure {
            config.retry_on_failure = enabled;
        }
        if let Some(enabled) = self.force_cache {
            config.force_cache = enabled;
        }
        if let Some(enabled) = self.track_memory {
            config.track_memory = enabled;
        }
        if let Some(enabled) = self.track_cpu {
            config.track_cpu = enabled;
        }
        if let Some(path) = &self.baseline {
            config.baseline_path = Some(path.clone());
        }
        if let Some(threshold) = self.regression_threshold {
            config.regression_threshold = threshold;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_TIMEOUT:              {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_MAX_RETRIES:          {:?}", ENV_PREFIX, self.max_retries);
        println!("  {}_RETRY_DELAY:          {:?}", ENV_PREFIX, self.retry_delay);
        println!("  {}_EXPONENTIAL_BACKOFF:  {:?}", ENV_PREFIX, self.exponential_backoff);
        println!("  {}_RETRY_ON_FAILURE:     {:?}", ENV_PREFIX, self.retry_on_failure);
        println!("  {}_FORCE_CACHE:          {:?}", ENV_PREFIX, self.force_cache);
        println!("  {}_TRACK_MEMORY:         {:?}", ENV_PREFIX, self.track_memory);
        println!("  {}_TRACK_CPU:            {:?}", ENV_PREFIX, self.track_cpu);
        println!("  {}_BASELINE:             {:?}", ENV_PREFIX, self.baseline);
        println!("  {}_REGRESSION_THRESHOLD: {:?}", ENV_PREFIX, self.regression_threshold);
        println!("  {}_CACHE_DIR:            {:?}", ENV_PREFIX, self.cache_dir);
        println!("  {}_CONFIG:               {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_FORMAT:               {:?}", ENV_PREFIX, self.format);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all TEST_ORCH environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TIMEOUT               Time budget per attempt in seconds");
    println!("  {ENV_PREFIX}_MAX_RETRIES           Attempts after the first one");
    println!("  {ENV_PREFIX}_RETRY_DELAY           Base delay between attempts in seconds");
    println!("  {ENV_PREFIX}_EXPONENTIAL_BACKOFF   Double the delay after each attempt (true/false)");
    println!("  {ENV_PREFIX}_RETRY_ON_FAILURE      Retry runs with failed tests (true/false)");
    println!("  {ENV_PREFIX}_FORCE_CACHE           Ignore cached results (true/false)");
    println!("  {ENV_PREFIX}_TRACK_MEMORY          Sample memory usage (true/false)");
    println!("  {ENV_PREFIX}_TRACK_CPU             Sample CPU usage (true/false)");
    println!("  {ENV_PREFIX}_BASELINE              Baseline file for regression comparison");
    println!("  {ENV_PREFIX}_REGRESSION_THRESHOLD  Regression threshold in percent");
    println!("  {ENV_PREFIX}_CACHE_DIR             Fingerprint cache directory");
    println!("  {ENV_PREFIX}_CONFIG                Path to configuration file");
    println!("  {ENV_PREFIX}_FORMAT                Output format (table, json, summary)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_TIMEOUT=600");
    println!("  export {ENV_PREFIX}_EXPONENTIAL_BACKOFF=true");
    println!("  test-orchestrator run --input src/lib.rs -- cargo test");
}
