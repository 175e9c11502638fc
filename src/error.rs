//! Error types used by the buildvisor runtime and its task combinators.
//!
//! A single enum, [`BuildError`], covers the whole failure taxonomy:
//! task-scoped failures (`Spawn`, `ProcessExit`, `Stream`, `Callback`,
//! `Filter`) that normalize into one terminal `Error` event before they
//! bubble through the composition tree, and run-scoped conditions
//! (`Timeout`, `Terminated`, `Canceled`) raised by the orchestrator or by
//! cancellation propagation.
//!
//! Programming errors (starting a build twice, starting an empty build,
//! re-linking a store) are not represented here: they panic synchronously
//! before any task begins and are never recoverable.

use thiserror::Error;

/// Exit code reported for any failed run.
pub const ERROR_EXIT_CODE: i32 = 1;

/// # Failures produced by build execution.
///
/// Task-scoped variants are always paired with a terminal
/// [`TaskEvent::Error`](crate::TaskEvent::Error) emitted by the failing
/// leaf; combinators only see the `BuildError` and use it to stop or
/// cancel sibling work.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BuildError {
    /// The external process could not be started at all.
    #[error("failed to spawn process: {source}")]
    Spawn {
        /// Underlying OS error from the spawn attempt.
        #[source]
        source: std::io::Error,
    },

    /// The external process exited with a nonzero status.
    #[error("process exited with code {code}")]
    ProcessExit {
        /// Exit code reported by the OS.
        code: i32,
    },

    /// A stderr chunk was escalated to a failure by the error-grace policy.
    #[error("{message}")]
    Stream {
        /// The escalated chunk (the last one seen inside the grace window).
        message: String,
    },

    /// A step callback returned an error or panicked.
    #[error("step task failed: {message}")]
    Callback {
        /// Message extracted from the callback error or panic payload.
        message: String,
    },

    /// An event filter raised while classifying an output chunk.
    #[error("event filter failed: {message}")]
    Filter {
        /// Message produced by the failing filter.
        message: String,
    },

    /// The global build timeout elapsed.
    #[error("build timed out after {seconds} seconds")]
    Timeout {
        /// The configured `timeout_seconds` value.
        seconds: u64,
    },

    /// The host OS asked the run to stop.
    #[error("termination signal received")]
    Terminated,

    /// The task was cancelled by a parent composition or a failing sibling.
    #[error("task cancelled")]
    Canceled,
}

impl BuildError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use buildvisor::BuildError;
    ///
    /// let err = BuildError::ProcessExit { code: 2 };
    /// assert_eq!(err.as_label(), "process_exit");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BuildError::Spawn { .. } => "spawn_error",
            BuildError::ProcessExit { .. } => "process_exit",
            BuildError::Stream { .. } => "stream_error",
            BuildError::Callback { .. } => "callback_error",
            BuildError::Filter { .. } => "filter_error",
            BuildError::Timeout { .. } => "build_timeout",
            BuildError::Terminated => "termination_signal",
            BuildError::Canceled => "task_canceled",
        }
    }

    /// Process-level exit code associated with this failure.
    ///
    /// Every failure maps to [`ERROR_EXIT_CODE`] except `ProcessExit`,
    /// which preserves the child's own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::ProcessExit { code } => *code,
            _ => ERROR_EXIT_CODE,
        }
    }

    /// True for errors that represent cancellation rather than failure of
    /// the task's own work.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BuildError::Canceled)
    }
}
