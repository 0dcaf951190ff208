//! Output module
//!
//! Console sinks for workload output and renderings of run outcomes.

mod formatter;
mod sink;

pub use formatter::{export_outcome, ExportFormat, OutputFormat, ReportFormatter};
pub use sink::{BufferSink, ConsoleSink, NullSink, OutputSink, Stream};
