//! Test Orchestrator - supervised test execution
//!
//! Runs a test command under a wall-clock budget, retries transient failures,
//! samples its resource usage and skips re-execution when the inputs it
//! depends on have not changed.
//!
//! ## Features
//!
//! - Per-attempt time budget with heartbeat and two-phase cancellation
//! - Bounded retries with fixed or exponential backoff
//! - Memory and CPU sampling of the test process
//! - Content fingerprint cache keyed by the input files
//! - Grades, stability score and regression comparison against a baseline
//!
//! ## Usage
//!
//! ```bash
//! # Run cargo test with a 10 minute budget, cached on the sources
//! test-orchestrator run --timeout 600 -i src/lib.rs -i src/parser.rs -- cargo test
//!
//! # Compare against a baseline and record a new one
//! test-orchestrator run --baseline base.json --save-baseline base.json -- make check
//!
//! # Inspect or clear the cache
//! test-orchestrator cache list
//! test-orchestrator cache clear
//! ```
//!
//! The test command receives its inputs, filter and verbosity through
//! `TEST_ORCH_*` environment variables and writes its result as JSON to the
//! path in `TEST_ORCH_RESULTS_FILE`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

mod cache;
mod cli;
mod config;
mod executor;
mod models;
mod monitor;
mod output;
mod results;
mod utils;

use cli::Args;
use config::{EnvConfig, OrchestratorConfig};
use executor::{CommandWorkload, Orchestrator, RunError};
use models::{TestFilter, Verbosity, WorkSpec};
use output::{export_outcome, ConsoleSink, ExportFormat, OutputFormat, ReportFormatter};
use results::{BaselineRecord, BaselineStore};
use utils::{init_logger, LogLevel};

/// Exit code for configuration and setup errors
const EXIT_SETUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(LogLevel::from_verbosity(args.verbose));

    let code = match args.command {
        cli::Command::Run(run_args) => run_tests(args.config.as_deref(), run_args).await,
        cli::Command::Baseline(baseline_args) => {
            report_setup(show_baseline(args.config.as_deref(), baseline_args))
        }
        cli::Command::Cache(cache_args) => {
            report_setup(manage_cache(args.config.as_deref(), cache_args))
        }
        cli::Command::Config(config_args) => {
            report_setup(manage_config(args.config.as_deref(), config_args))
        }
    };

    ExitCode::from(code)
}

/// Map a management command result to an exit code
fn report_setup(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            EXIT_SETUP
        }
    }
}

/// Defaults, then config file, then environment
fn load_config(explicit: Option<&Path>) -> Result<(OrchestratorConfig, EnvConfig)> {
    let env = EnvConfig::load();
    let explicit = explicit.or(env.config_file.as_deref());

    let (mut config, source) = OrchestratorConfig::load_or_default(explicit)?;
    if let Some(path) = source {
        info!("Using configuration {}", path.display());
    }
    env.apply(&mut config);
    Ok((config, env))
}

async fn run_tests(config_path: Option<&Path>, args: cli::RunArgs) -> u8 {
    let prepared = prepare_run(config_path, &args);
    let (config, spec, format) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_SETUP;
        }
    };

    let sink = Arc::new(ConsoleSink::new());
    let orchestrator = Orchestrator::from_config(&config, sink);

    let outcome = match orchestrator.run(&spec).await {
        Ok(outcome) => outcome,
        Err(e) => {
            report_run_error(&e);
            return e.exit_code();
        }
    };

    match ReportFormatter::new(format).format_outcome(&outcome) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => error!("{:#}", e),
    }

    if let Some(path) = &args.output {
        let export = ExportFormat::from_extension(path).unwrap_or(ExportFormat::Json);
        if let Err(e) = export_outcome(&outcome, path, export) {
            error!("{:#}", e);
        }
    }

    if let Some(path) = &args.save_baseline {
        let record = BaselineRecord::from_report(&outcome.report);
        match BaselineStore::new(path).save(&record) {
            Ok(()) => info!("Baseline written to {}", path.display()),
            Err(e) => error!("{:#}", e),
        }
    }

    outcome.exit_code()
}

fn prepare_run(
    config_path: Option<&Path>,
    args: &cli::RunArgs,
) -> Result<(OrchestratorConfig, WorkSpec, OutputFormat)> {
    let (mut config, env) = load_config(config_path)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let format_name = args
        .format
        .as_deref()
        .or(env.format.as_deref())
        .unwrap_or("table");
    let Some(format) = OutputFormat::from_str(format_name) else {
        bail!("Unknown output format: {}", format_name);
    };

    let Some(verbosity) = Verbosity::from_str(&args.verbosity) else {
        bail!("Unknown verbosity: {}", args.verbosity);
    };

    let Some((program, program_args)) = args.command.split_first() else {
        bail!("No test command given");
    };

    let mut workload = CommandWorkload::new(program.as_str()).args(program_args.iter().cloned());
    if let Some(name) = &args.name {
        workload = workload.with_name(name.as_str());
    }

    let mut filter = TestFilter::new();
    for pattern in &args.filters {
        filter = filter.pattern(pattern.as_str());
    }
    for tag in &args.include_tags {
        filter = filter.include_tag(tag.as_str());
    }
    for tag in &args.exclude_tags {
        filter = filter.exclude_tag(tag.as_str());
    }

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| workload.command_line());
    let spec = WorkSpec::new(name, Arc::new(workload))
        .with_inputs(args.inputs.iter().cloned())
        .with_filter(filter)
        .with_verbosity(verbosity);

    Ok((config, spec, format))
}

fn report_run_error(err: &RunError) {
    error!("{}", err);
    if let Some(last) = err.last_failure() {
        error!("Last failure: {}", last);
    }
    for record in err.history() {
        error!("  {}", record);
    }
}

fn show_baseline(config_path: Option<&Path>, args: cli::BaselineArgs) -> Result<()> {
    match args.action {
        cli::BaselineAction::Show { path } => {
            let path = match path {
                Some(path) => path,
                None => {
                    let (config, _) = load_config(config_path)?;
                    config
                        .baseline_path
                        .context("No baseline path given or configured")?
                }
            };

            let record = BaselineStore::new(&path).load()?;
            let summary = &record.test_summary;
            let env = &record.environment;

            println!("Baseline: {}", path.display());
            println!("{:-<60}", "");
            println!(
                "  Generated:   {}",
                record.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!(
                "  Tests:       {} total, {} passed, {} failed, {} skipped",
                summary.total, summary.passed, summary.failed, summary.skipped
            );
            println!("  Duration:    {}ms", summary.duration_ms);
            if let Some(perf) = &record.performance {
                if let Some(peak) = perf.peak_memory_mb {
                    println!("  Peak memory: {:.1} MB", peak);
                }
                if let Some(cpu) = perf.cpu_percent {
                    println!("  CPU:         {:.1}%", cpu);
                }
            }
            println!(
                "  Environment: {} {} ({} cpus{}{})",
                env.os,
                env.arch,
                env.processor_count,
                if env.is_ci { ", CI" } else { "" },
                if env.is_container { ", container" } else { "" }
            );
            println!("  Per-test durations: {}", record.tests.len());
        }
    }

    Ok(())
}

fn manage_cache(config_path: Option<&Path>, args: cli::CacheArgs) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let cache = config.cache();

    match args.action {
        cli::CacheAction::List => {
            let entries = cache.entries()?;
            if entries.is_empty() {
                println!("No cached results in {}", cache.dir().display());
                return Ok(());
            }

            println!("Cached results in {}:\n", cache.dir().display());
            println!(
                "{:16} {:20} {:>6} {:>6} {:>6}",
                "FINGERPRINT", "STORED", "INPUTS", "TESTS", "FAILED"
            );
            for entry in entries {
                println!(
                    "{:16} {:20} {:>6} {:>6} {:>6}",
                    entry.fingerprint.get(..16).unwrap_or(&entry.fingerprint),
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.inputs,
                    entry.total,
                    entry.failed
                );
            }
        }

        cli::CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("✓ Removed {} cached result(s)", removed);
        }
    }

    Ok(())
}

fn manage_config(config_path: Option<&Path>, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            OrchestratorConfig::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let (config, _) = load_config(config_path)?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Env => {
            config::print_env_help();
            let env = EnvConfig::load();
            if env.has_any() {
                println!();
                env.print_summary();
            }
        }
    }

    Ok(())
}
