//! # Build: the root orchestrator.
//!
//! [`Build`] owns the store and drives one composed producer to
//! completion, wiring up the pieces a root run needs and an embedded one
//! must not have: the global timeout, the OS termination signal, and the
//! reporter.
//!
//! ## State machine
//! ```text
//! Idle ──run()──► Running ──► Finished
//!                    │
//!                    ├─ live stream ───► Report::on_event
//!                    ├─ side channel ──► Report::on_late_event
//!                    ├─ timeout ───────► log_timeout + cancel + exit 1
//!                    └─ OS signal ─────► log_plain  + cancel + exit 1
//! ```
//!
//! ## Root vs embedded
//! A build definition is just a [`BuildDef`] producing an [`OpRef`].
//! Splicing it into a larger run (`sub_build`) and orchestrating it
//! standalone (`run_def`) are explicit, separate entry points; nothing
//! is inferred from calling context.
//!
//! ## Programming errors
//! Calling `run` twice, or with zero operations, is a bug in the build
//! script, not a runtime condition: both panic synchronously before any
//! task starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::options::BuildOptions;
use crate::core::shutdown;
use crate::error::{BuildError, ERROR_EXIT_CODE};
use crate::events::EventChannel;
use crate::ops::{serial, BuildDef, ExecContext, OpRef};
use crate::report::Report;
#[cfg(not(feature = "logging"))]
use crate::report::NullReporter;
use crate::store::{initial_state, BuildState, BuildStore};

/// Final outcome of one orchestrated run.
///
/// Returned to the caller instead of mutating ambient process state; a
/// thin CLI entry point applies `exit_code` to the real process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// `0` on success, nonzero on any failure, timeout, or termination.
    pub exit_code: i32,
    /// True only when every step completed and nothing flipped the
    /// store's `success` flag.
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Finished,
}

/// Root build orchestrator.
///
/// # Example
/// ```no_run
/// use buildvisor::{ops, Build, ProcessSpec};
///
/// #[tokio::main]
/// async fn main() {
///     let mut build = Build::new();
///     let result = build
///         .run(vec![
///             ops::log("building"),
///             ops::run(ProcessSpec::new("cargo").args(["build"]).named("compile")),
///         ])
///         .await;
///     std::process::exit(result.exit_code);
/// }
/// ```
pub struct Build {
    store: BuildStore,
    reporter: Option<Arc<dyn Report>>,
    phase: Phase,
}

impl Default for Build {
    fn default() -> Self {
        Self::new()
    }
}

impl Build {
    /// Creates a build with default options.
    pub fn new() -> Self {
        Self::with_options(BuildOptions::default())
    }

    /// Creates a build, merging `options` over the seeded defaults.
    pub fn with_options(options: BuildOptions) -> Self {
        let store = BuildStore::with_state(initial_state());
        store.set_state(options.to_patch());
        Build {
            store,
            reporter: None,
            phase: Phase::Idle,
        }
    }

    /// Merges a state patch over the current configuration: the hook for
    /// process-start-time argument overrides parsed by the caller.
    pub fn with_overrides(self, patch: BuildState) -> Self {
        self.store.set_state(patch);
        self
    }

    /// Supplies the reporter explicitly instead of resolving it from the
    /// `reporter_kind` state key.
    pub fn with_reporter(mut self, reporter: Arc<dyn Report>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// The root store of this build.
    pub fn store(&self) -> &BuildStore {
        &self.store
    }

    /// Orchestrates a reusable build definition standalone.
    pub async fn run_def(&mut self, def: impl BuildDef) -> RunResult {
        let op = def.compose(&self.store);
        self.run(vec![op]).await
    }

    /// Runs the given operations as a sequential composition and drives
    /// the event stream into the reporter until completion.
    ///
    /// # Panics
    /// Panics when called twice on the same build or with zero
    /// operations; both are programming errors in the build script.
    pub async fn run(&mut self, ops: Vec<OpRef>) -> RunResult {
        if self.phase != Phase::Idle {
            panic!("build already started");
        }
        if ops.is_empty() {
            panic!("no operations queued in the build");
        }
        self.phase = Phase::Running;

        let reporter = self
            .reporter
            .clone()
            .unwrap_or_else(|| resolve_reporter(&self.store));
        let timeout_seconds = self.store.select(|s| s.timeout_seconds());

        let (events, mut rx) = EventChannel::pair();
        let token = CancellationToken::new();
        let ctx = ExecContext::new(self.store.clone(), events, token.clone());
        let root = serial(ops);

        let mut driver = tokio::spawn(async move { root.execute(&ctx).await });

        let timeout = time::sleep(Duration::from_secs(timeout_seconds.max(1)));
        tokio::pin!(timeout);
        let signal = shutdown::wait_for_termination_signal();
        tokio::pin!(signal);

        let mut timed_out = false;
        let mut terminated = false;
        let mut signal_done = false;
        let mut live_open = true;
        let mut side_open = true;
        let mut driver_result: Option<Result<(), BuildError>> = None;

        // the loop ends when the composed producer is done, not when the
        // channels close: an orphaned callback may keep a sender alive
        // long after the run is over. `biased` drains queued events
        // before completion is observed.
        while driver_result.is_none() {
            tokio::select! {
                biased;
                ev = rx.live.recv(), if live_open => match ev {
                    Some(ev) => reporter.on_event(&ev).await,
                    None => live_open = false,
                },
                ev = rx.side.recv(), if side_open => match ev {
                    Some(ev) => reporter.on_late_event(&ev).await,
                    None => side_open = false,
                },
                res = &mut driver => {
                    driver_result = Some(res.unwrap_or_else(|join_err| {
                        Err(BuildError::Callback {
                            message: format!("build task aborted: {join_err}"),
                        })
                    }));
                }
                _ = &mut timeout, if timeout_seconds > 0 && !timed_out && !terminated => {
                    timed_out = true;
                    warn!(timeout_seconds, "build timed out, cancelling the run");
                    reporter.log_timeout(&format!(
                        "build timeout after {timeout_seconds} seconds, stopping build"
                    ));
                    token.cancel();
                }
                res = &mut signal, if !signal_done && !timed_out => {
                    signal_done = true;
                    match res {
                        Ok(()) => {
                            terminated = true;
                            reporter.log_plain("termination signal received, stopping build");
                            token.cancel();
                        }
                        Err(e) => warn!(error = %e, "termination signal listener unavailable"),
                    }
                }
            }
        }

        // anything sent in the instant between the last poll and driver
        // completion is still pending in the queues
        while let Ok(ev) = rx.live.try_recv() {
            reporter.on_event(&ev).await;
        }
        while let Ok(ev) = rx.side.try_recv() {
            reporter.on_late_event(&ev).await;
        }

        let driver_result = driver_result.unwrap_or(Err(BuildError::Canceled));
        debug!(
            ok = driver_result.is_ok(),
            timed_out, terminated, "build run finished"
        );

        let clean = driver_result.is_ok()
            && !timed_out
            && !terminated
            && self.store.select(|s| s.success());
        let result = if clean {
            RunResult {
                exit_code: 0,
                success: true,
            }
        } else {
            let exit_code = match &driver_result {
                Err(e) => e.exit_code(),
                Ok(()) => ERROR_EXIT_CODE,
            };
            RunResult {
                exit_code,
                success: false,
            }
        };

        reporter.on_complete(&result).await;
        self.phase = Phase::Finished;
        result
    }
}

/// Fallback sink when the caller supplied no reporter. Real renderers are
/// external collaborators resolved by the presentation layer; the engine
/// only ships the demo sink (feature `logging`) and a silent one.
fn resolve_reporter(store: &BuildStore) -> Arc<dyn Report> {
    let kind = store.select(|s| s.reporter_kind);
    debug!(?kind, "no reporter supplied, using the built-in sink");

    #[cfg(feature = "logging")]
    {
        Arc::new(crate::report::LogReporter::new())
    }
    #[cfg(not(feature = "logging"))]
    {
        Arc::new(NullReporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TaskEvent;
    use crate::ops::{self, iif, step};
    use crate::tasks::{ProcessSpec, TaskInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingReporter {
        live: Mutex<Vec<TaskEvent>>,
        late: Mutex<Vec<TaskEvent>>,
        plain: Mutex<Vec<String>>,
        completed: Mutex<Option<RunResult>>,
    }

    #[async_trait]
    impl Report for CollectingReporter {
        async fn on_event(&self, event: &TaskEvent) {
            self.live.lock().unwrap().push(event.clone());
        }

        async fn on_late_event(&self, event: &TaskEvent) {
            self.late.lock().unwrap().push(event.clone());
        }

        async fn on_complete(&self, result: &RunResult) {
            *self.completed.lock().unwrap() = Some(*result);
        }

        fn log_plain(&self, text: &str) {
            self.plain.lock().unwrap().push(text.to_string());
        }
    }

    fn collecting_build() -> (Build, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let build = Build::new().with_reporter(reporter.clone());
        (build, reporter)
    }

    #[tokio::test]
    async fn successful_run_reports_exit_zero() {
        let (mut build, reporter) = collecting_build();
        let result = build
            .run(vec![
                ops::log("starting"),
                step(TaskInfo::named("ok"), |_| Ok(Some("fine".into()))),
            ])
            .await;

        assert_eq!(
            result,
            RunResult {
                exit_code: 0,
                success: true
            }
        );
        assert_eq!(*reporter.completed.lock().unwrap(), Some(result));
        let live = reporter.live.lock().unwrap();
        assert!(live.iter().any(|e| matches!(e, TaskEvent::Done { .. })));
    }

    #[tokio::test]
    async fn failing_step_reports_nonzero_exit() {
        let (mut build, reporter) = collecting_build();
        let result = build
            .run(vec![step(TaskInfo::named("bad"), |_| {
                Err("broken".into())
            })])
            .await;

        assert_eq!(result.exit_code, ERROR_EXIT_CODE);
        assert!(!result.success);
        assert!(!build.store().select(|s| s.success()));
        let live = reporter.live.lock().unwrap();
        assert!(live.iter().any(|e| matches!(e, TaskEvent::Error { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_code_propagates_into_the_result() {
        let (mut build, _reporter) = collecting_build();
        let result = build
            .run(vec![ops::run(ProcessSpec::new("sh").args(["-c", "exit 7"]))])
            .await;

        assert_eq!(result.exit_code, 7);
        assert!(!result.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quiet_failure_still_yields_nonzero_exit() {
        // halt_on_errors=false completes the stream; the flag decides
        let (mut build, reporter) = collecting_build();
        let result = build
            .run(vec![ops::run(
                ProcessSpec::new("sh")
                    .args(["-c", "exit 2"])
                    .halt_on_errors(false),
            )])
            .await;

        assert_eq!(result.exit_code, ERROR_EXIT_CODE);
        assert!(!result.success);
        let live = reporter.live.lock().unwrap();
        assert!(live.iter().any(|e| matches!(e, TaskEvent::Done { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_cancels_the_run_and_reports_nonzero() {
        let reporter = Arc::new(CollectingReporter::default());
        let mut build = Build::with_options(BuildOptions {
            timeout_seconds: Some(1),
            ..BuildOptions::default()
        })
        .with_reporter(reporter.clone());

        let started = tokio::time::Instant::now();
        let result = build
            .run(vec![ops::run(
                ProcessSpec::new("sh").args(["-c", "sleep 30"]).named("slow"),
            )])
            .await;

        assert!(!result.success);
        assert_eq!(result.exit_code, ERROR_EXIT_CODE);
        assert!(
            started.elapsed() < Duration::from_secs(20),
            "timeout must cut the run short"
        );
        let plain = reporter.plain.lock().unwrap();
        assert!(plain.iter().any(|m| m.contains("build timeout after 1 seconds")));
        // teardown visibility arrives through the side channel
        let late = reporter.late.lock().unwrap();
        assert!(late.iter().any(|e| matches!(
            e,
            TaskEvent::Data { text, .. } if text.contains("process stopped after")
        )));
    }

    #[tokio::test]
    async fn later_steps_can_branch_on_recorded_failure() {
        let (mut build, reporter) = collecting_build();
        let result = build
            .run(vec![
                step(TaskInfo::named("mark"), |action| {
                    action.set_state(BuildState::default().with_success(false));
                    Ok(None)
                }),
                iif(
                    |s| !s.success(),
                    step(TaskInfo::named("cleanup"), |_| Ok(None)),
                    None,
                ),
            ])
            .await;

        assert!(!result.success);
        let live = reporter.live.lock().unwrap();
        let starts: Vec<String> = live
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Start { task, .. } => Some(task.label()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec!["mark", "cleanup"]);
    }

    #[tokio::test]
    async fn run_def_orchestrates_a_reusable_definition() {
        let def = |_: &BuildStore| -> OpRef {
            step(TaskInfo::named("from-def"), |_| Ok(None))
        };
        let (mut build, reporter) = collecting_build();
        let result = build.run_def(def).await;

        assert!(result.success);
        let live = reporter.live.lock().unwrap();
        assert!(live.iter().any(|e| matches!(
            e,
            TaskEvent::Start { task, .. } if task.label() == "from-def"
        )));
    }

    #[tokio::test]
    #[should_panic(expected = "no operations queued")]
    async fn empty_build_panics() {
        let (mut build, _) = collecting_build();
        let _ = build.run(vec![]).await;
    }

    #[tokio::test]
    #[should_panic(expected = "build already started")]
    async fn double_start_panics() {
        let (mut build, _) = collecting_build();
        let _ = build
            .run(vec![step(TaskInfo::named("once"), |_| Ok(None))])
            .await;
        let _ = build
            .run(vec![step(TaskInfo::named("twice"), |_| Ok(None))])
            .await;
    }

    #[tokio::test]
    async fn options_override_seeded_defaults() {
        let build = Build::with_options(BuildOptions {
            error_timeout_ms: Some(0),
            ..BuildOptions::default()
        });
        assert_eq!(build.store().select(|s| s.error_timeout_ms()), 0);
        // untouched keys keep their defaults
        assert_eq!(
            build.store().select(|s| s.timeout_seconds()),
            crate::store::DEFAULT_TIMEOUT_SECONDS
        );
    }
}
