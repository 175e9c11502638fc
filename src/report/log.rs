//! # Demo stdout reporter.
//!
//! [`LogReporter`] prints events in a compact human-readable format.
//! Enabled via the `logging` feature; meant for development and demos,
//! not as a production renderer.
//!
//! ## Output format
//! ```text
//! [start] compile  (cargo build --release)
//! [data] compile: Compiling buildvisor v0.1.0
//! [done] compile in 1520ms
//! [error] tests: process exited with code 101 (exit 101)
//! [artifact] package: /tmp/out/report.zip
//! build finished: exit 0
//! ```

use async_trait::async_trait;

use crate::core::RunResult;
use crate::events::{LogLevel, TaskEvent};
use crate::report::reporter::Report;

/// Compact stdout sink for development use.
#[derive(Default)]
pub struct LogReporter;

impl LogReporter {
    /// Creates the reporter.
    pub fn new() -> Self {
        LogReporter
    }

    fn level_tag(level: LogLevel) -> &'static str {
        match level {
            LogLevel::Plain => "data",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::StatusLine => "status",
        }
    }
}

#[async_trait]
impl Report for LogReporter {
    async fn on_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Start {
                task, command_line, ..
            } => match command_line {
                Some(line) => println!("[start] {}  ({line})", task.label()),
                None => println!("[start] {}", task.label()),
            },
            TaskEvent::Data {
                task, text, level, ..
            } => {
                println!("[{}] {}: {text}", Self::level_tag(*level), task.label());
            }
            TaskEvent::Done {
                task, run_time_ms, ..
            } => {
                println!("[done] {} in {run_time_ms}ms", task.label());
            }
            TaskEvent::Error {
                task,
                message,
                exit_code,
                ..
            } => {
                println!("[error] {}: {message} (exit {exit_code})", task.label());
            }
            TaskEvent::Artifact { task, path } => {
                println!("[artifact] {}: {}", task.label(), path.display());
            }
        }
    }

    async fn on_late_event(&self, event: &TaskEvent) {
        print!("[late]");
        self.on_event(event).await;
    }

    async fn on_complete(&self, result: &RunResult) {
        println!("build finished: exit {}", result.exit_code);
    }

    fn log_plain(&self, text: &str) {
        println!("{text}");
    }
}
