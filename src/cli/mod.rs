//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OrchestratorConfig;

/// Supervised test execution with retries, caching and regression tracking
#[derive(Parser, Debug)]
#[command(name = "test-orchestrator")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run test suites under a time budget with retries, caching and baselines")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a test command under supervision
    Run(RunArgs),

    /// Inspect baseline documents
    Baseline(BaselineArgs),

    /// Manage the fingerprint cache
    Cache(CacheArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Input file the results depend on (repeatable)
    #[arg(short, long = "input", value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Test name pattern forwarded to the test framework (repeatable)
    #[arg(long = "filter", value_name = "PATTERN")]
    pub filters: Vec<String>,

    /// Only run tests with this tag (repeatable)
    #[arg(long = "include-tag", value_name = "TAG")]
    pub include_tags: Vec<String>,

    /// Skip tests with this tag (repeatable)
    #[arg(long = "exclude-tag", value_name = "TAG")]
    pub exclude_tags: Vec<String>,

    /// Test framework verbosity (quiet, minimal, normal, detailed, diagnostic)
    #[arg(long, default_value = "normal")]
    pub verbosity: String,

    /// Time budget per attempt in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Attempts after the first one
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base delay between attempts in seconds
    #[arg(long)]
    pub retry_delay: Option<f64>,

    /// Double the delay after each failed attempt
    #[arg(long)]
    pub exponential_backoff: bool,

    /// Retry runs that report failed tests
    #[arg(long)]
    pub retry_on_failure: bool,

    /// Ignore cached results
    #[arg(long)]
    pub force_cache: bool,

    /// Do not sample memory usage
    #[arg(long)]
    pub no_track_memory: bool,

    /// Sample CPU usage
    #[arg(long)]
    pub track_cpu: bool,

    /// Baseline to compare against
    #[arg(short, long)]
    pub baseline: Option<PathBuf>,

    /// Regression threshold in percent
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Write this run as the new baseline
    #[arg(long, value_name = "PATH")]
    pub save_baseline: Option<PathBuf>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Export the outcome to a .json or .csv file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Display name of the workload
    #[arg(long)]
    pub name: Option<String>,

    /// Test command and its arguments
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Overwrite configuration with the flags that were given
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
        if self.exponential_backoff {
            config.exponential_backoff = true;
        }
        if self.retry_on_failure {
            config.retry_on_failure = true;
        }
        if self.force_cache {
            config.force_cache = true;
        }
        if self.no_track_memory {
            config.track_memory = false;
        }
        if self.track_cpu {
            config.track_cpu = true;
        }
        if let Some(path) = &self.baseline {
            config.baseline_path = Some(path.clone());
        }
        if let Some(threshold) = self.threshold {
            config.regression_threshold = threshold;
        }
    }
}

/// Arguments for baseline inspection
#[derive(Parser, Debug)]
pub struct BaselineArgs {
    #[command(subcommand)]
    pub action: BaselineAction,
}

#[derive(Subcommand, Debug)]
pub enum BaselineAction {
    /// Show a baseline document
    Show {
        /// Baseline path (defaults to the configured baseline)
        path: Option<PathBuf>,
    },
}

/// Arguments for cache management
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached results
    List,

    /// Remove all cached results
    Clear,
}

/// Arguments for configuration management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "test-orchestrator.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// List supported environment variables
    Env,
}
