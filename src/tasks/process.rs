//! # Process supervisor: runs one external command as an event producer.
//!
//! [`ProcessTask`] spawns a command, turns its stdout/stderr into
//! [`TaskEvent`]s, applies the error-grace and filtering policies, and
//! guarantees process-tree termination on cancellation or failure.
//!
//! ## Lifecycle
//! ```text
//! resolve args/cwd from state ──► allocate TaskMeta ──► emit Start
//!        │
//!        ▼
//! spawn (own process group) ──► supervise loop:
//!   stdout line ── filters ──► Data(Plain)        (or buffered when capturing)
//!   stderr line ──┬─ redirect? ──► stdout path
//!                 ├─ "warning"? ──► Data(Warn)
//!                 └─ error chunk ──► Data(Error) + grace policy
//!   exit         ──► Done / Error("process exited with code N")
//!   cancel       ──► tree kill + side-channel terminal event
//! ```
//!
//! ## Error-grace policy
//! The first error chunk marks the task as errored and is shown to the
//! consumer immediately. With `error_timeout_ms == 0` the task fails on
//! the spot; otherwise a debounce timer is (re)armed per chunk and the
//! task fails with the **last** chunk once the stream stays quiet for the
//! whole window, so an upstream tool can flush every related error line
//! before the build gives up.
//!
//! ## Rules
//! - Exactly one terminal event per invocation, on the live stream or —
//!   after cancellation, on the side channel. Never both, never neither.
//! - A nonzero exit with `halt_on_errors == false` flips the `success`
//!   flag but still completes with `Done`; the exit code alone decides
//!   success in that mode.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::{AsyncRead, BufReader, Lines};
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::{BuildError, ERROR_EXIT_CODE};
use crate::events::{LogLevel, TaskEvent};
use crate::ops::{ExecContext, Operation};
use crate::store::{apply_filters, BuildState, EventFilter};
use crate::tasks::kill::{kill_tree, StopSignal};
use crate::tasks::meta::{TaskInfo, TaskMeta};

/// Window given to a process to exit on its own before its tree is killed.
const STOP_GRACE: Duration = Duration::from_millis(1000);

/// Callback receiving the buffered stdout of a capturing process task.
pub type ResponseFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Command arguments: literal, or resolved from build state at spawn time.
#[derive(Clone)]
pub enum ArgSource {
    /// Fixed argument list.
    Literal(Vec<String>),
    /// Projection evaluated against the merged state when the task spawns.
    FromState(Arc<dyn Fn(&BuildState) -> Vec<String> + Send + Sync>),
}

impl Default for ArgSource {
    fn default() -> Self {
        ArgSource::Literal(Vec::new())
    }
}

impl ArgSource {
    fn resolve(&self, state: &BuildState) -> Vec<String> {
        match self {
            ArgSource::Literal(args) => args.clone(),
            ArgSource::FromState(f) => f(state),
        }
    }
}

/// Specification of one supervised external command.
///
/// # Example
/// ```rust
/// use buildvisor::ProcessSpec;
///
/// let spec = ProcessSpec::new("cargo")
///     .args(["build", "--release"])
///     .named("compile")
///     .halt_on_errors(false);
/// assert_eq!(spec.command, "cargo");
/// ```
#[derive(Clone, Default)]
pub struct ProcessSpec {
    /// Identity attached to the allocated descriptor.
    pub info: TaskInfo,
    /// Executable to spawn.
    pub command: String,
    /// Argument list, literal or late-bound.
    pub args: ArgSource,
    /// Extra environment entries (inherited environment stays intact).
    pub env: Vec<(String, String)>,
    /// Working directory; falls back to the store's `working_dir`.
    pub working_dir: Option<PathBuf>,
    /// Prepends `--max-old-space-size={mb}` when set.
    pub memory_limit_mb: Option<u32>,
    /// Escalate stderr chunks into failures (default `true`).
    pub halt_on_errors: bool,
    /// Treat stderr exactly like stdout (default `false`).
    pub redirect_stderr_as_stdout: bool,
    /// Buffer stdout and hand it to this callback at exit instead of
    /// streaming it.
    pub response: Option<ResponseFn>,
    /// Task-scoped output filters, applied after the store-scoped ones.
    pub filters: Vec<EventFilter>,
    /// Signal used to stop the process tree.
    pub stop_signal: StopSignal,
}

impl ProcessSpec {
    /// Creates a spec for `command` with default policies.
    pub fn new(command: impl Into<String>) -> Self {
        ProcessSpec {
            command: command.into(),
            halt_on_errors: true,
            ..ProcessSpec::default()
        }
    }

    /// Appends one literal argument.
    ///
    /// # Panics
    /// Panics when the arguments are late-bound; mixing literal and
    /// state-resolved arguments is a composition error.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        match &mut self.args {
            ArgSource::Literal(args) => args.push(arg.into()),
            ArgSource::FromState(_) => panic!("cannot append a literal arg to late-bound args"),
        }
        self
    }

    /// Replaces the argument list with literals.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = ArgSource::Literal(args.into_iter().map(Into::into).collect());
        self
    }

    /// Late-binds the argument list to a state projection.
    pub fn args_from_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&BuildState) -> Vec<String> + Send + Sync + 'static,
    {
        self.args = ArgSource::FromState(Arc::new(f));
        self
    }

    /// Sets the task name.
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.info.name = Some(name.into());
        self
    }

    /// Sets the full task identity.
    pub fn with_info(mut self, info: TaskInfo) -> Self {
        self.info = info;
        self
    }

    /// Adds an environment entry.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Overrides the working directory for this task.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Injects a memory-limit flag at the front of the argument list.
    pub fn memory_limit_mb(mut self, mb: u32) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Controls stderr escalation.
    pub fn halt_on_errors(mut self, halt: bool) -> Self {
        self.halt_on_errors = halt;
        self
    }

    /// Treats stderr like stdout.
    pub fn redirect_stderr_as_stdout(mut self, redirect: bool) -> Self {
        self.redirect_stderr_as_stdout = redirect;
        self
    }

    /// Buffers stdout and hands it to `f` at process exit.
    pub fn response<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.response = Some(Arc::new(f));
        self
    }

    /// Adds a task-scoped output filter.
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the stop signal used for tree termination.
    pub fn stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_signal = signal;
        self
    }
}

/// Operation wrapper supervising one [`ProcessSpec`].
pub struct ProcessTask {
    spec: ProcessSpec,
}

impl ProcessTask {
    /// Creates the operation for one process spec.
    pub fn new(spec: ProcessSpec) -> Self {
        ProcessTask { spec }
    }
}

#[async_trait]
impl Operation for ProcessTask {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        let spec = &self.spec;

        // Late-bound resolution happens at spawn time, against whatever
        // the state says right now.
        let (mut args, cwd, store_filters, error_timeout_ms) = ctx.store.select(|s| {
            (
                spec.args.resolve(s),
                spec.working_dir.clone().or_else(|| s.working_dir.clone()),
                s.event_filters().to_vec(),
                s.error_timeout_ms(),
            )
        });
        if let Some(mb) = spec.memory_limit_mb {
            args.insert(0, format!("--max-old-space-size={mb}"));
        }

        let meta = TaskMeta::allocate(&spec.info, &ctx.store);
        let start_time = SystemTime::now();
        let command_line = if args.is_empty() {
            spec.command.clone()
        } else {
            format!("{} {}", spec.command, args.join(" "))
        };
        ctx.events.emit(TaskEvent::start(
            meta.clone(),
            start_time,
            Some(command_line.clone()),
        ));

        let mut cmd = Command::new(&spec.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                ctx.store.mark_failed();
                ctx.events.emit(TaskEvent::failed(
                    meta,
                    start_time,
                    "process error",
                    Some(source.to_string()),
                    ERROR_EXIT_CODE,
                ));
                return Err(BuildError::Spawn { source });
            }
        };
        debug!(command = %command_line, pid = child.id(), "process spawned");

        let run = ProcessRun {
            spec,
            ctx,
            meta,
            start_time,
            command_line,
            store_filters,
        };
        run.supervise(child, error_timeout_ms).await
    }
}

/// How the supervise loop ended; teardown happens after the loop so the
/// child handle is free of stream borrows.
enum LoopExit {
    Natural { exit_code: i32 },
    Escalated { error: BuildError },
    Cancelled { pending: Option<String> },
}

enum StderrClass {
    AsStdout,
    Warning,
    ErrorChunk,
}

struct ProcessRun<'a> {
    spec: &'a ProcessSpec,
    ctx: &'a ExecContext,
    meta: TaskMeta,
    start_time: SystemTime,
    command_line: String,
    store_filters: Vec<EventFilter>,
}

impl ProcessRun<'_> {
    async fn supervise(&self, mut child: Child, error_timeout_ms: u64) -> Result<(), BuildError> {
        let pid = child.id();
        let mut stdout_lines = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr_lines = child.stderr.take().map(|s| BufReader::new(s).lines());
        let mut stdout_open = stdout_lines.is_some();
        let mut stderr_open = stderr_lines.is_some();
        let mut captured = self.spec.response.as_ref().map(|_| String::new());

        let mut exit_code: Option<i32> = None;
        let mut errored = false;
        let mut pending_error: Option<String> = None;

        let error_timer = time::sleep(Duration::ZERO);
        tokio::pin!(error_timer);
        let mut timer_armed = false;

        let exit = loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    break LoopExit::Cancelled { pending: pending_error.take() };
                }
                line = read_line(&mut stdout_lines), if stdout_open => {
                    match line {
                        None => stdout_open = false,
                        Some(text) => {
                            if let Some(buf) = captured.as_mut() {
                                buf.push_str(&text);
                                buf.push('\n');
                            } else if let Err(error) = self.stream_chunk(&text) {
                                break LoopExit::Escalated { error };
                            }
                        }
                    }
                }
                line = read_line(&mut stderr_lines), if stderr_open => {
                    match line {
                        None => stderr_open = false,
                        Some(text) => match self.classify_stderr(&text) {
                            StderrClass::AsStdout => {
                                if let Err(error) = self.stream_chunk(&text) {
                                    break LoopExit::Escalated { error };
                                }
                            }
                            StderrClass::Warning => {
                                self.ctx.events.emit(TaskEvent::data(
                                    self.meta.clone(),
                                    text,
                                    LogLevel::Warn,
                                ));
                            }
                            StderrClass::ErrorChunk => {
                                // every error chunk is visible on the live
                                // stream before the task terminates
                                self.ctx.events.emit(TaskEvent::data(
                                    self.meta.clone(),
                                    text.clone(),
                                    LogLevel::Error,
                                ));
                                if !self.spec.halt_on_errors {
                                    continue;
                                }
                                errored = true;
                                if error_timeout_ms == 0 {
                                    break LoopExit::Escalated {
                                        error: BuildError::Stream { message: text },
                                    };
                                }
                                pending_error = Some(text);
                                error_timer.as_mut().reset(
                                    Instant::now() + Duration::from_millis(error_timeout_ms),
                                );
                                timer_armed = true;
                            }
                        },
                    }
                }
                status = child.wait(), if exit_code.is_none() => {
                    exit_code = Some(match status {
                        Ok(status) => status.code().unwrap_or(-1),
                        Err(e) => {
                            warn!(error = %e, "waiting on child process failed");
                            -1
                        }
                    });
                }
                _ = &mut error_timer, if timer_armed => {
                    let message = pending_error.take().unwrap_or_default();
                    break LoopExit::Escalated {
                        error: BuildError::Stream { message },
                    };
                }
            }

            if let Some(code) = exit_code {
                if !stdout_open && !stderr_open && !errored {
                    break LoopExit::Natural { exit_code: code };
                }
                // an errored task keeps looping until the grace timer
                // fires with the final pending chunk
            }
        };

        match exit {
            LoopExit::Natural { exit_code } => {
                if let (Some(response), Some(buf)) = (&self.spec.response, captured.take()) {
                    response(&buf);
                }
                if exit_code == 0 {
                    self.ctx
                        .events
                        .emit(TaskEvent::done(self.meta.clone(), self.start_time));
                    return Ok(());
                }
                self.ctx.store.mark_failed();
                if !self.spec.halt_on_errors {
                    // exit code decides the success flag, not the stream
                    self.ctx
                        .events
                        .emit(TaskEvent::done(self.meta.clone(), self.start_time));
                    return Ok(());
                }
                self.ctx.events.emit(TaskEvent::failed(
                    self.meta.clone(),
                    self.start_time,
                    format!("process exited with code {exit_code}"),
                    None,
                    exit_code,
                ));
                Err(BuildError::ProcessExit { code: exit_code })
            }
            LoopExit::Escalated { error } => {
                self.ctx.store.mark_failed();
                self.ctx.events.emit(TaskEvent::failed(
                    self.meta.clone(),
                    self.start_time,
                    error.to_string(),
                    None,
                    error.exit_code(),
                ));
                self.stop_after_error(&mut child, pid, exit_code.is_some()).await;
                Err(error)
            }
            LoopExit::Cancelled { pending } => {
                self.teardown_cancelled(&mut child, pid, errored, pending, exit_code.is_some())
                    .await
            }
        }
    }

    fn classify_stderr(&self, text: &str) -> StderrClass {
        if self.spec.redirect_stderr_as_stdout {
            StderrClass::AsStdout
        } else if text.to_lowercase().contains("warning") {
            StderrClass::Warning
        } else {
            StderrClass::ErrorChunk
        }
    }

    /// Streams one stdout-like chunk through the filter chains.
    fn stream_chunk(&self, text: &str) -> Result<(), BuildError> {
        match apply_filters(&self.store_filters, &self.spec.filters, text) {
            Ok(Some(text)) => {
                self.ctx
                    .events
                    .emit(TaskEvent::data(self.meta.clone(), text, LogLevel::Plain));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(message) => Err(BuildError::Filter { message }),
        }
    }

    /// After a self-inflicted failure: give the process one grace window
    /// to exit on its own, then take its tree down.
    async fn stop_after_error(&self, child: &mut Child, pid: Option<u32>, exited: bool) {
        if exited {
            return;
        }
        if time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
            return;
        }
        self.stop_tree(child, pid).await;
    }

    /// Cancellation teardown. The consumer has already detached, so every
    /// notification and the terminal event go through the side channel.
    async fn teardown_cancelled(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        errored: bool,
        pending: Option<String>,
        exited: bool,
    ) -> Result<(), BuildError> {
        if !exited {
            if errored {
                // this task triggered the failure; let a natural exit land
                // before resorting to the kill
                if time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                    self.stop_tree(child, pid).await;
                }
            } else {
                self.stop_tree(child, pid).await;
            }
        }
        let message = pending.unwrap_or_else(|| "task cancelled".to_string());
        self.ctx.events.emit_late(TaskEvent::failed(
            self.meta.clone(),
            self.start_time,
            message,
            None,
            ERROR_EXIT_CODE,
        ));
        Err(BuildError::Canceled)
    }

    /// Kills the whole process tree and reports the outcome on the side
    /// channel so operational visibility survives the unsubscribe.
    async fn stop_tree(&self, child: &mut Child, pid: Option<u32>) {
        let Some(pid) = pid else {
            return;
        };
        match kill_tree(pid, self.spec.stop_signal).await {
            Ok(()) => {
                let _ = child.wait().await;
                let run_time_ms = self
                    .start_time
                    .elapsed()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                debug!(pid, run_time_ms, "process tree stopped");
                self.ctx.events.emit_late(TaskEvent::data(
                    self.meta.clone(),
                    format!("{} process stopped after {run_time_ms}ms", self.meta.label()),
                    LogLevel::Info,
                ));
            }
            Err(e) => {
                warn!(pid, error = %e, "process tree could not be stopped");
                self.ctx.store.mark_failed();
                self.ctx.events.emit_late(TaskEvent::data_with_error(
                    self.meta.clone(),
                    format!(
                        "{} process could not be stopped (command: {})",
                        self.meta.label(),
                        self.command_line
                    ),
                    LogLevel::Error,
                    e.to_string(),
                ));
            }
        }
    }
}

async fn read_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines.as_mut() {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}
