//! # Step combinator: in-process callbacks with a process-shaped lifecycle.
//!
//! A step wraps a callback as an event producer with the same
//! Start/Data/terminal shape as a supervised process. The callback talks
//! to the build through a [`StepAction`] handle exposing
//! `log/info/warn/status_line/artifact/error/done/select/set_state`.
//!
//! Two modes:
//! - **synchronous** — the callback returns `Ok(Some(message))` as sugar
//!   for an immediate success message; the combinator auto-completes the
//!   task afterwards either way.
//! - **asynchronous** — the callback receives an owned handle and must
//!   call `done`/`error` itself, possibly after other async work.
//!
//! ## Rules
//! - `Start` is emitted immediately, before the callback runs.
//! - A callback that returns an error or panics fails the task with a
//!   fixed wrapping message plus the original cause.
//! - `done()` after the task has already completed is a no-op, not an
//!   error; so is any logging call made after completion.
//! - An async callback that finishes without ever signalling completion
//!   fails the task instead of hanging the build.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::{BuildError, ERROR_EXIT_CODE};
use crate::events::{EventChannel, LogLevel, TaskEvent};
use crate::ops::{ExecContext, Operation};
use crate::store::{BuildState, BuildStore};
use crate::tasks::meta::{TaskInfo, TaskMeta};

/// Result of a synchronous step callback.
///
/// `Ok(Some(message))` logs the message and completes the task;
/// `Ok(None)` completes silently; `Err` fails the task.
pub type StepResult = Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>;

const WRAP_MESSAGE: &str = "an error occurred in the step callback";

/// Handle given to a step callback for talking to the build.
///
/// Cloneable; all clones share one completion state, so `done`/`error`
/// take effect exactly once no matter which clone calls them.
#[derive(Clone)]
pub struct StepAction {
    meta: TaskMeta,
    start_time: SystemTime,
    events: EventChannel,
    store: BuildStore,
    completion: Arc<Completion>,
}

struct Completion {
    finished: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Result<(), BuildError>>>>,
}

impl StepAction {
    fn new(
        meta: TaskMeta,
        start_time: SystemTime,
        events: EventChannel,
        store: BuildStore,
        tx: oneshot::Sender<Result<(), BuildError>>,
    ) -> Self {
        StepAction {
            meta,
            start_time,
            events,
            store,
            completion: Arc::new(Completion {
                finished: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        }
    }

    /// Descriptor allocated for this step.
    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// Emits plain output.
    pub fn log(&self, message: impl Into<String>) {
        self.emit_data(message, LogLevel::Plain);
    }

    /// Emits an informational notice.
    pub fn info(&self, message: impl Into<String>) {
        self.emit_data(message, LogLevel::Info);
    }

    /// Emits a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.emit_data(message, LogLevel::Warn);
    }

    /// Emits a build-status line.
    pub fn status_line(&self, message: impl Into<String>) {
        self.emit_data(message, LogLevel::StatusLine);
    }

    /// Announces a produced artifact.
    pub fn artifact(&self, path: impl Into<PathBuf>) {
        if !self.is_finished() {
            self.events
                .emit(TaskEvent::artifact(self.meta.clone(), path));
        }
    }

    /// Read-only projection over the build state.
    pub fn select<T>(&self, selector: impl FnOnce(&BuildState) -> T) -> T {
        self.store.select(selector)
    }

    /// Shallow-merges a patch into the build state.
    pub fn set_state(&self, patch: BuildState) {
        self.store.set_state(patch);
    }

    /// Completes the step successfully. No-op if already completed.
    pub fn done(&self) {
        self.finish(None, TaskEvent::done(self.meta.clone(), self.start_time), Ok(()));
    }

    /// Logs `message`, then completes the step successfully.
    pub fn done_with(&self, message: impl Into<String>) {
        let message = message.into();
        let pre = if message.is_empty() {
            None
        } else {
            Some(TaskEvent::data(
                self.meta.clone(),
                message,
                LogLevel::Plain,
            ))
        };
        self.finish(pre, TaskEvent::done(self.meta.clone(), self.start_time), Ok(()));
    }

    /// Fails the step. No-op if already completed.
    pub fn error(&self, message: impl Into<String>) {
        self.fail(message.into(), None);
    }

    /// Fails the step with an underlying cause attached.
    pub fn error_with(&self, message: impl Into<String>, cause: impl Into<String>) {
        self.fail(message.into(), Some(cause.into()));
    }

    fn fail(&self, message: String, cause: Option<String>) {
        self.store.mark_failed();
        let terminal = TaskEvent::failed(
            self.meta.clone(),
            self.start_time,
            message.clone(),
            cause,
            ERROR_EXIT_CODE,
        );
        self.finish(None, terminal, Err(BuildError::Callback { message }));
    }

    fn emit_data(&self, message: impl Into<String>, level: LogLevel) {
        if !self.is_finished() {
            self.events
                .emit(TaskEvent::data(self.meta.clone(), message, level));
        }
    }

    fn is_finished(&self) -> bool {
        self.completion.finished.load(Ordering::SeqCst)
    }

    /// First completion wins; everything after is a no-op.
    fn finish(&self, pre: Option<TaskEvent>, terminal: TaskEvent, result: Result<(), BuildError>) {
        if self.completion.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ev) = pre {
            self.events.emit(ev);
        }
        self.events.emit(terminal);
        let tx = self
            .completion
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }

    /// Cancellation: seals the handle and delivers the terminal event on
    /// the side channel, where the detached consumer can still see it.
    fn seal_cancelled(&self) {
        if self.completion.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.events.emit_late(TaskEvent::failed(
            self.meta.clone(),
            self.start_time,
            "task cancelled",
            None,
            ERROR_EXIT_CODE,
        ));
    }
}

type SyncCallback = Arc<dyn Fn(&StepAction) -> StepResult + Send + Sync>;
type AsyncCallback = Arc<dyn Fn(StepAction) -> BoxFuture<'static, ()> + Send + Sync>;

enum StepMode {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

/// Operation wrapping one step callback.
pub struct StepTask {
    info: TaskInfo,
    mode: StepMode,
}

impl StepTask {
    /// Creates a synchronous step.
    pub fn new_sync<F>(info: TaskInfo, f: F) -> Self
    where
        F: Fn(&StepAction) -> StepResult + Send + Sync + 'static,
    {
        StepTask {
            info,
            mode: StepMode::Sync(Arc::new(f)),
        }
    }

    /// Creates an asynchronous step; the callback owns the handle and must
    /// call `done`/`error` on it.
    pub fn new_async<F, Fut>(info: TaskInfo, f: F) -> Self
    where
        F: Fn(StepAction) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        StepTask {
            info,
            mode: StepMode::Async(Arc::new(move |action| f(action).boxed())),
        }
    }
}

#[async_trait]
impl Operation for StepTask {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        let meta = TaskMeta::allocate(&self.info, &ctx.store);
        let start_time = SystemTime::now();
        ctx.events
            .emit(TaskEvent::start(meta.clone(), start_time, None));

        let (tx, rx) = oneshot::channel();
        let action = StepAction::new(
            meta,
            start_time,
            ctx.events.clone(),
            ctx.store.clone(),
            tx,
        );

        match &self.mode {
            StepMode::Sync(f) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| f(&action))) {
                    Ok(Ok(Some(message))) => action.done_with(message),
                    Ok(Ok(None)) => action.done(),
                    Ok(Err(e)) => action.error_with(WRAP_MESSAGE, e.to_string()),
                    Err(panic) => action.error_with(WRAP_MESSAGE, panic_message(&panic)),
                }
                // auto-completion above guarantees the receiver is ready
                tokio::select! {
                    result = rx => result.unwrap_or(Err(BuildError::Canceled)),
                    _ = ctx.cancel.cancelled() => {
                        action.seal_cancelled();
                        Err(BuildError::Canceled)
                    }
                }
            }
            StepMode::Async(f) => {
                let cb_action = action.clone();
                let fut = AssertUnwindSafe(f(action.clone())).catch_unwind();
                let callback = tokio::spawn(async move {
                    if let Err(panic) = fut.await {
                        cb_action.error_with(WRAP_MESSAGE, panic_message(&panic));
                    }
                });
                tokio::pin!(callback);
                let mut callback_running = true;
                let mut rx = rx;

                loop {
                    tokio::select! {
                        result = &mut rx => {
                            return result.unwrap_or(Err(BuildError::Canceled));
                        }
                        _ = ctx.cancel.cancelled() => {
                            action.seal_cancelled();
                            return Err(BuildError::Canceled);
                        }
                        _ = &mut callback, if callback_running => {
                            callback_running = false;
                            // callback finished, nothing completed the task
                            // and no handle survives to do it later: fail
                            // instead of hanging the build
                            if !action.is_finished()
                                && Arc::strong_count(&action.completion) == 1
                            {
                                let message =
                                    "step completed without signalling done".to_string();
                                action.fail(message.clone(), None);
                                return Err(BuildError::Callback { message });
                            }
                        }
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
