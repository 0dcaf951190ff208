//! Output sinks
//!
//! Workload output is written through an injected [`OutputSink`] instead of
//! the process-wide stdout/stderr. Capturing output means handing the worker a
//! [`BufferSink`]; dropping the sink ends the capture.

use std::io::Write;
use std::sync::Mutex;

/// Stream a line of workload output was written to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Destination for workload output
pub trait OutputSink: Send + Sync {
    fn write_line(&self, stream: Stream, line: &str);
}

/// Forwards workload output to the terminal.
///
/// Everything goes to stderr so that reports on stdout stay parseable.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for ConsoleSink {
    fn write_line(&self, _stream: Stream, line: &str) {
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
    }
}

/// Captures workload output in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<(Stream, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured lines in write order
    pub fn lines(&self) -> Vec<(Stream, String)> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Captured lines of one stream joined with newlines
    pub fn contents(&self, stream: Stream) -> String {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl OutputSink for BufferSink {
    fn write_line(&self, stream: Stream, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push((stream, line.to_string()));
    }
}

/// Discards all output
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_line(&self, _stream: Stream, _line: &str) {}
}
