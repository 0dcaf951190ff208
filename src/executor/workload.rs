//! Test framework boundary
//!
//! A [`Workload`] receives the inputs, filter and verbosity of one invocation
//! and blocks until it can hand back a [`TestResult`].

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

use super::error::SetupFailure;
use super::worker::WorkerContext;
use crate::models::{TestInvocation, TestResult};
use crate::output::Stream;

/// Environment variable naming the file the command writes its results to
pub const RESULTS_FILE_ENV: &str = "TEST_ORCH_RESULTS_FILE";
pub const INPUTS_ENV: &str = "TEST_ORCH_INPUTS";
pub const FILTER_ENV: &str = "TEST_ORCH_FILTER";
pub const INCLUDE_TAGS_ENV: &str = "TEST_ORCH_INCLUDE_TAGS";
pub const EXCLUDE_TAGS_ENV: &str = "TEST_ORCH_EXCLUDE_TAGS";
pub const VERBOSITY_ENV: &str = "TEST_ORCH_VERBOSITY";

/// Something that runs tests and reports a structured result
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    /// Run the tests. Blocking; called on the worker thread.
    fn run(&self, invocation: &TestInvocation, ctx: &WorkerContext) -> Result<TestResult>;
}

/// In-process workload backed by a closure
pub struct FnWorkload<F> {
    name: String,
    func: F,
}

impl<F> FnWorkload<F>
where
    F: Fn(&TestInvocation, &WorkerContext) -> Result<TestResult> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Workload for FnWorkload<F>
where
    F: Fn(&TestInvocation, &WorkerContext) -> Result<TestResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, invocation: &TestInvocation, ctx: &WorkerContext) -> Result<TestResult> {
        (self.func)(invocation, ctx)
    }
}

impl<F> fmt::Debug for FnWorkload<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorkload").field("name", &self.name).finish()
    }
}

/// External test command.
///
/// The invocation is passed through `TEST_ORCH_*` environment variables and
/// the command writes its result as JSON to the file named by
/// `TEST_ORCH_RESULTS_FILE`. A non-zero exit status alone is not a failure;
/// failing tests are expected to be reported in the results file.
#[derive(Clone, Debug)]
pub struct CommandWorkload {
    name: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandWorkload {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn build_command(&self, invocation: &TestInvocation, results_file: &Path) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env(RESULTS_FILE_ENV, results_file)
            .env(INPUTS_ENV, join_inputs(&invocation.inputs)?)
            .env(FILTER_ENV, invocation.filter.name_patterns.join(","))
            .env(INCLUDE_TAGS_ENV, invocation.filter.include_tags.join(","))
            .env(EXCLUDE_TAGS_ENV, invocation.filter.exclude_tags.join(","))
            .env(VERBOSITY_ENV, invocation.verbosity.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so cancellation reaches everything the command
        // starts and not just the wrapper
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        Ok(cmd)
    }
}

impl Workload for CommandWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, invocation: &TestInvocation, ctx: &WorkerContext) -> Result<TestResult> {
        let results_file = tempfile::Builder::new()
            .prefix("test-orchestrator-results-")
            .suffix(".json")
            .tempfile()
            .context("Failed to create results file")?
            .into_temp_path();
        let results_path = results_file.to_path_buf();

        let start = Instant::now();
        let mut child = match self.build_command(invocation, &results_path)?.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let cause = format!("Test command not found: {} ({})", self.program, e);
                return Err(SetupFailure(cause).into());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to start test command: {}", self.command_line())));
            }
        };

        ctx.register_child(child.id());
        info!(pid = child.id(), "Started test command: {}", self.command_line());

        let stderr_forwarder = child.stderr.take().map(|stderr| {
            let ctx = ctx.clone();
            thread::spawn(move || forward_lines(stderr, Stream::Stderr, &ctx))
        });
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, Stream::Stdout, ctx);
        }
        if let Some(handle) = stderr_forwarder {
            let _ = handle.join();
        }

        let status = ctx
            .reap_child(&mut child)
            .context("Failed to wait for test command")?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(%status, elapsed_ms, "Test command exited");

        if ctx.is_cancelled() {
            bail!("Test command was cancelled ({})", status);
        }

        let content = std::fs::read_to_string(&results_path)
            .with_context(|| format!("Failed to read results file: {}", results_path.display()))?;
        if content.trim().is_empty() {
            bail!(
                "Test command exited with {} without writing results to {}",
                status,
                RESULTS_FILE_ENV
            );
        }

        let mut result: TestResult =
            serde_json::from_str(&content).context("Failed to parse test command results")?;
        if result.duration_ms == 0 {
            result.duration_ms = elapsed_ms;
        }

        Ok(result)
    }
}

fn join_inputs(inputs: &[PathBuf]) -> Result<OsString> {
    std::env::join_paths(inputs).context("Input path contains a path separator")
}

fn forward_lines<R: Read>(reader: R, stream: Stream, ctx: &WorkerContext) {
    for line in BufReader::new(reader).lines() {
        match line {
            Ok(line) => ctx.emit(stream, &line),
            Err(e) => {
                debug!(stream = stream.as_str(), "Stopped forwarding output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestFilter, Verbosity};
    use crate::monitor::ProcessTarget;
    use crate::output::BufferSink;
    use std::sync::Arc;

    #[test]
    fn test_fn_workload_runs_closure() {
        let workload = FnWorkload::new("unit", |invocation, _| {
            Ok(TestResult::from_counts(invocation.inputs.len(), 0, 0, 1))
        });
        let invocation = TestInvocation {
            inputs: vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")],
            ..Default::default()
        };

        let result = workload.run(&invocation, &WorkerContext::detached()).unwrap();
        assert_eq!(workload.name(), "unit");
        assert_eq!(result.passed, 2);
    }

    #[test]
    fn test_command_line() {
        let workload = CommandWorkload::new("cargo").args(["test", "--quiet"]);
        assert_eq!(workload.command_line(), "cargo test --quiet");
        assert_eq!(workload.name(), "cargo");
        assert_eq!(workload.with_name("unit").name(), "unit");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_workload_reads_results_and_forwards_output() {
        let script = r#"echo "filter=$TEST_ORCH_FILTER verbosity=$TEST_ORCH_VERBOSITY"
echo "oops" >&2
printf '{"total":2,"passed":1,"failed":1,"skipped":0,"duration_ms":12,"records":[{"name":"a","outcome":"passed"},{"name":"b","outcome":"failed","error_message":"boom"}]}' > "$TEST_ORCH_RESULTS_FILE"
exit 1"#;
        let workload = CommandWorkload::new("sh").arg("-c").arg(script);
        let sink = Arc::new(BufferSink::new());
        let ctx = WorkerContext::new(ProcessTarget::current(), sink.clone());
        let invocation = TestInvocation {
            inputs: Vec::new(),
            filter: TestFilter::new().pattern("parser").pattern("lexer"),
            verbosity: Verbosity::Detailed,
        };

        let result = workload.run(&invocation, &ctx).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.duration_ms, 12);
        assert_eq!(
            sink.contents(Stream::Stdout),
            "filter=parser,lexer verbosity=detailed"
        );
        assert_eq!(sink.contents(Stream::Stderr), "oops");
        assert_eq!(ctx.child_pid(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_without_results_is_an_error() {
        let workload = CommandWorkload::new("sh").arg("-c").arg("exit 0");
        let err = workload
            .run(&TestInvocation::default(), &WorkerContext::detached())
            .unwrap_err();
        assert!(err.to_string().contains("without writing results"));
    }

    #[test]
    fn test_missing_program_is_a_setup_failure() {
        let workload = CommandWorkload::new("definitely-not-a-test-runner-binary");
        let err = workload
            .run(&TestInvocation::default(), &WorkerContext::detached())
            .unwrap_err();
        assert!(err.is::<SetupFailure>());
        assert!(err.to_string().contains("definitely-not-a-test-runner-binary"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_command_leads_its_own_process_group() {
        let script = r#"printf '{"total":1,"passed":1,"failed":0,"skipped":0,"duration_ms":1}' > "$TEST_ORCH_RESULTS_FILE"
cut -d' ' -f5 /proc/$$/stat
echo $$"#;
        let workload = CommandWorkload::new("sh").arg("-c").arg(script);
        let sink = Arc::new(BufferSink::new());
        let ctx = WorkerContext::new(ProcessTarget::current(), sink.clone());

        workload.run(&TestInvocation::default(), &ctx).unwrap();

        let stdout = sink.contents(Stream::Stdout);
        let ids: Vec<&str> = stdout.lines().map(str::trim).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }
}
