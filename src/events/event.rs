//! # Lifecycle events exchanged between task producers and the reporter.
//!
//! [`TaskEvent`] is the vocabulary of the whole engine: every leaf task
//! emits exactly one [`TaskEvent::Start`], zero or more
//! [`TaskEvent::Data`] / [`TaskEvent::Artifact`] notifications, and
//! exactly one terminal event ([`TaskEvent::Done`] xor
//! [`TaskEvent::Error`]). Composition combinators merge or concatenate
//! these streams but never break the per-leaf invariant.
//!
//! Events are pure data. The only computation is `run_time_ms`, derived
//! once when a terminal event is constructed.
//!
//! ## Example
//! ```rust
//! use std::time::SystemTime;
//! use buildvisor::{TaskEvent, TaskMeta};
//!
//! let meta = TaskMeta::anonymous();
//! let start = SystemTime::now();
//! let ev = TaskEvent::done(meta, start);
//! assert!(ev.is_terminal());
//! ```

use std::path::PathBuf;
use std::time::SystemTime;

use crate::tasks::TaskMeta;

/// Severity attached to a [`TaskEvent::Data`] chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Ordinary output (stdout, step `log`).
    Plain,
    /// Informational notice.
    Info,
    /// Warning (stderr chunks matching the warning heuristic).
    Warn,
    /// Error output that has not (or will not) terminate the task.
    Error,
    /// Build-status line intended for CI status displays.
    StatusLine,
}

/// A lifecycle event produced by one task and consumed by the reporter.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The task has started. Always the first event of a leaf.
    Start {
        /// Descriptor of the emitting task.
        task: TaskMeta,
        /// Wall-clock start time.
        start_time: SystemTime,
        /// Fully-resolved command line, for process tasks.
        command_line: Option<String>,
    },

    /// A chunk of task output.
    Data {
        /// Descriptor of the emitting task.
        task: TaskMeta,
        /// Chunk text, after event-filter processing.
        text: String,
        /// Severity of the chunk.
        level: LogLevel,
        /// Optional underlying error description.
        error: Option<String>,
    },

    /// Terminal success. Mutually exclusive with [`TaskEvent::Error`].
    Done {
        /// Descriptor of the emitting task.
        task: TaskMeta,
        /// Wall-clock start time.
        start_time: SystemTime,
        /// Wall-clock finish time.
        finish_time: SystemTime,
        /// `finish_time - start_time`, floored to milliseconds.
        run_time_ms: u64,
    },

    /// Terminal failure. Mutually exclusive with [`TaskEvent::Done`].
    Error {
        /// Descriptor of the emitting task.
        task: TaskMeta,
        /// Wall-clock start time.
        start_time: SystemTime,
        /// Wall-clock finish time.
        finish_time: SystemTime,
        /// `finish_time - start_time`, floored to milliseconds.
        run_time_ms: u64,
        /// Human-readable failure message.
        message: String,
        /// Optional underlying error description.
        error: Option<String>,
        /// Exit code the run should report for this failure.
        exit_code: i32,
    },

    /// A produced artifact path. Side notification, never terminal.
    Artifact {
        /// Descriptor of the emitting task.
        task: TaskMeta,
        /// Path of the artifact on disk.
        path: PathBuf,
    },
}

impl TaskEvent {
    /// Creates a `Start` event.
    pub fn start(task: TaskMeta, start_time: SystemTime, command_line: Option<String>) -> Self {
        TaskEvent::Start {
            task,
            start_time,
            command_line,
        }
    }

    /// Creates a `Data` event without an attached error.
    pub fn data(task: TaskMeta, text: impl Into<String>, level: LogLevel) -> Self {
        TaskEvent::Data {
            task,
            text: text.into(),
            level,
            error: None,
        }
    }

    /// Creates a `Data` event carrying an underlying error description.
    pub fn data_with_error(
        task: TaskMeta,
        text: impl Into<String>,
        level: LogLevel,
        error: impl Into<String>,
    ) -> Self {
        TaskEvent::Data {
            task,
            text: text.into(),
            level,
            error: Some(error.into()),
        }
    }

    /// Creates a terminal `Done` event, stamping the finish time now.
    pub fn done(task: TaskMeta, start_time: SystemTime) -> Self {
        let finish_time = SystemTime::now();
        TaskEvent::Done {
            task,
            start_time,
            finish_time,
            run_time_ms: run_time_ms(start_time, finish_time),
        }
    }

    /// Creates a terminal `Error` event, stamping the finish time now.
    pub fn failed(
        task: TaskMeta,
        start_time: SystemTime,
        message: impl Into<String>,
        error: Option<String>,
        exit_code: i32,
    ) -> Self {
        let finish_time = SystemTime::now();
        TaskEvent::Error {
            task,
            start_time,
            finish_time,
            run_time_ms: run_time_ms(start_time, finish_time),
            message: message.into(),
            error,
            exit_code,
        }
    }

    /// Creates an `Artifact` event.
    pub fn artifact(task: TaskMeta, path: impl Into<PathBuf>) -> Self {
        TaskEvent::Artifact {
            task,
            path: path.into(),
        }
    }

    /// Descriptor of the task that emitted this event.
    pub fn task(&self) -> &TaskMeta {
        match self {
            TaskEvent::Start { task, .. }
            | TaskEvent::Data { task, .. }
            | TaskEvent::Done { task, .. }
            | TaskEvent::Error { task, .. }
            | TaskEvent::Artifact { task, .. } => task,
        }
    }

    /// True for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Done { .. } | TaskEvent::Error { .. })
    }

    /// Short stable label for logs/metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            TaskEvent::Start { .. } => "start",
            TaskEvent::Data { .. } => "data",
            TaskEvent::Done { .. } => "done",
            TaskEvent::Error { .. } => "error",
            TaskEvent::Artifact { .. } => "artifact",
        }
    }
}

fn run_time_ms(start: SystemTime, finish: SystemTime) -> u64 {
    finish
        .duration_since(start)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn terminal_classification() {
        let meta = TaskMeta::anonymous();
        assert!(!TaskEvent::start(meta.clone(), SystemTime::now(), None).is_terminal());
        assert!(!TaskEvent::data(meta.clone(), "x", LogLevel::Plain).is_terminal());
        assert!(TaskEvent::done(meta.clone(), SystemTime::now()).is_terminal());
        assert!(TaskEvent::failed(meta, SystemTime::now(), "boom", None, 1).is_terminal());
    }

    #[test]
    fn run_time_is_computed_at_construction() {
        let start = SystemTime::now() - Duration::from_millis(50);
        match TaskEvent::done(TaskMeta::anonymous(), start) {
            TaskEvent::Done { run_time_ms, .. } => assert!(run_time_ms >= 50),
            _ => unreachable!(),
        }
    }

    #[test]
    fn run_time_clamps_clock_skew_to_zero() {
        let start = SystemTime::now() + Duration::from_secs(60);
        match TaskEvent::done(TaskMeta::anonymous(), start) {
            TaskEvent::Done { run_time_ms, .. } => assert_eq!(run_time_ms, 0),
            _ => unreachable!(),
        }
    }
}
