//! # buildvisor
//!
//! **Buildvisor** is a composable build/task orchestration library for
//! Rust.
//!
//! It turns a tree of build steps (shell commands, in-process callbacks,
//! conditionals, nested sub-builds) into a single ordered or interleaved
//! stream of lifecycle events, executes external processes with
//! supervised lifetimes, and reports progress and failure to a pluggable
//! sink.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ProcessSpec  │   │  step(...)   │   │ sub_build(..)│
//!     │ (run(...))   │   │ step_async() │   │  iif(...)    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  serial(...) / parallel(...) composition (OpRef tree)             │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Build (root orchestrator)                                        │
//! │  - BuildStore (hierarchical shared state)                         │
//! │  - EventChannel (live stream + cancellation side channel)         │
//! │  - global timeout, OS termination signal                          │
//! │  - CancellationToken propagation (top-down)                       │
//! └──────┬───────────────────────────────────────────────────┬────────┘
//!        ▼                                                   ▼
//!   live events ────────► Report::on_event       side events ► on_late_event
//!                                                              (teardown)
//! ```
//!
//! ### Leaf lifecycle
//! ```text
//! allocate TaskMeta (hierarchy-unique id)
//!   └─► emit Start
//!        └─► Data / Artifact ... (stdout, stderr, step calls, filters)
//!             └─► exactly one of Done xor Error
//!
//! stderr chunk (process tasks):
//!   ├─ "warning" heuristic ─► Data(Warn)
//!   ├─ halt_on_errors=false ─► Data(Error), exit code decides success
//!   └─ else ─► Data(Error) + error-grace debounce ─► Error(last chunk)
//!
//! cancellation (sibling failed, timeout, OS signal):
//!   └─► kill whole process tree ─► notifications + terminal event on the
//!       side channel (operational visibility survives the unsubscribe)
//! ```
//!
//! ## Features
//! | Area             | Description                                                       | Key types / functions                      |
//! |------------------|-------------------------------------------------------------------|--------------------------------------------|
//! | **Processes**    | Supervised commands with filtering and error-grace debounce.      | [`ProcessSpec`], [`ops::run`]              |
//! | **Steps**        | In-process callbacks with a process-shaped lifecycle.             | [`StepAction`], [`ops::step`], [`ops::step_async`] |
//! | **Composition**  | Sequential, interleaved, conditional, embedded sub-builds.        | [`ops::serial`], [`ops::parallel`], [`ops::iif`], [`ops::sub_build`] |
//! | **State**        | Hierarchically-linked shared build state with shallow merges.     | [`BuildStore`], [`BuildState`]             |
//! | **Events**       | Lifecycle event model and delivery channels.                      | [`TaskEvent`], [`LogLevel`]                |
//! | **Orchestration**| Root run with timeout, signal handling, reporter wiring.          | [`Build`], [`RunResult`]                   |
//! | **Reporting**    | Pluggable sink boundary; rendering stays external.                | [`Report`]                                 |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in `LogReporter` _(demo/reference only)_.
//!
//! ## Example
//! ```no_run
//! use buildvisor::{ops, Build, BuildState, ProcessSpec, TaskInfo};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut build = Build::new();
//!     let result = build
//!         .run(vec![
//!             ops::log("nightly build"),
//!             ops::step(TaskInfo::named("prepare"), |action| {
//!                 action.set_state(BuildState::default().with_ext("suite", "full"));
//!                 Ok(Some("environment ready".into()))
//!             }),
//!             ops::parallel(vec![
//!                 ops::run(ProcessSpec::new("cargo").args(["build"]).named("compile")),
//!                 ops::run(
//!                     ProcessSpec::new("cargo")
//!                         .args_from_state(|s| {
//!                             let suite = s
//!                                 .get("suite")
//!                                 .and_then(|v| v.as_str())
//!                                 .unwrap_or("smoke")
//!                                 .to_string();
//!                             vec!["test".into(), "--features".into(), suite]
//!                         })
//!                         .named("tests"),
//!                 ),
//!             ]),
//!             ops::iif(
//!                 |s| s.success(),
//!                 ops::log("all green"),
//!                 Some(ops::log("build failed, skipping publish")),
//!             ),
//!         ])
//!         .await;
//!     std::process::exit(result.exit_code);
//! }
//! ```

mod core;
mod error;
mod events;
pub mod ops;
mod report;
mod store;
mod tasks;

// ---- Public re-exports ----

pub use core::{Build, BuildOptions, RunResult};
pub use error::{BuildError, ERROR_EXIT_CODE};
pub use events::{EventChannel, EventReceivers, LogLevel, TaskEvent};
pub use report::{NullReporter, Report};
pub use store::{
    apply_filters, filter_fn, initial_state, BuildState, BuildStore, EventFilter, FilterAction,
    ReporterKind, StateValue, DEFAULT_ERROR_TIMEOUT_MS, DEFAULT_PREFIX_WIDTH,
    DEFAULT_TIMEOUT_SECONDS,
};
pub use tasks::{
    kill_tree, ArgSource, ProcessSpec, ProcessTask, ResponseFn, StatusMessage, StepAction,
    StepResult, StepTask, StopSignal, TaskInfo, TaskMeta,
};

// Optional: expose the demo stdout reporter.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use report::LogReporter;
