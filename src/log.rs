//! Activity log capability injected into every task
//!
//! Tasks report what they are doing through an [`ActivityLog`] carried in their run
//! context instead of a process-wide logger. [`TracingLog`] is the default sink.

use std::error::Error as StdError;
use std::fmt;

/// Sink for human-readable activity and error reports
pub trait ActivityLog: Send + Sync + fmt::Debug {
    /// Report a notable step of the run
    fn message(&self, text: &str);

    /// Report detail that is only interesting when diagnosing a run
    fn debug(&self, text: &str);

    /// Report a failure, with the error that caused it if there is one
    fn error(&self, text: &str, cause: Option<&(dyn StdError + 'static)>);
}

/// Forwards activity to `tracing` under the `cloud_dl::activity` target
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLog;

impl ActivityLog for TracingLog {
    fn message(&self, text: &str) {
        tracing::info!(target: "cloud_dl::activity", "{text}");
    }

    fn debug(&self, text: &str) {
        tracing::debug!(target: "cloud_dl::activity", "{text}");
    }

    fn error(&self, text: &str, cause: Option<&(dyn StdError + 'static)>) {
        match cause {
            Some(cause) => tracing::error!(target: "cloud_dl::activity", error = %cause, "{text}"),
            None => tracing::error!(target: "cloud_dl::activity", "{text}"),
        }
    }
}

/// Log that keeps every line in memory, for tests and diagnostics panes
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: std::sync::Mutex<Vec<LogLine>>,
}

/// One line recorded by a [`MemoryLog`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogLine {
    /// From [`ActivityLog::message`]
    Message(String),
    /// From [`ActivityLog::debug`]
    Debug(String),
    /// From [`ActivityLog::error`], with the rendered cause
    Error(String, Option<String>),
}

impl MemoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line recorded so far
    pub fn lines(&self) -> Vec<LogLine> {
        crate::utils::lock(&self.lines).clone()
    }

    /// Only the error lines
    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                LogLine::Error(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, line: LogLine) {
        crate::utils::lock(&self.lines).push(line);
    }
}

impl ActivityLog for MemoryLog {
    fn message(&self, text: &str) {
        self.push(LogLine::Message(text.to_string()));
    }

    fn debug(&self, text: &str) {
        self.push(LogLine::Debug(text.to_string()));
    }

    fn error(&self, text: &str, cause: Option<&(dyn StdError + 'static)>) {
        self.push(LogLine::Error(
            text.to_string(),
            cause.map(|c| c.to_string()),
        ));
    }
}
