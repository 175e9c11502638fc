//! # Composition combinators.
//!
//! Free functions that assemble [`OpRef`]s into larger producers:
//!
//! - [`run`] / [`step`] / [`step_async`] — wrap the leaf task types
//! - [`serial`] — strict concatenation, stop at first failure
//! - [`parallel`] — interleaved execution, first failure cancels siblings
//! - [`iif`] — lazy conditional branch over build state
//! - [`sub_build`] — splice another build definition in, with a linked
//!   child store
//! - [`log`] — emit a single anonymous output line
//!
//! ## Ordering
//! Within one producer, event order is emission order. Across `serial`
//! children, total order is enforced by deferred start. Across `parallel`
//! children, only each branch's internal order survives the merge.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::BuildError;
use crate::events::{LogLevel, TaskEvent};
use crate::ops::op::{ExecContext, OpRef, Operation};
use crate::store::{BuildState, BuildStore};
use crate::tasks::{ProcessSpec, ProcessTask, StepAction, StepResult, StepTask, TaskInfo, TaskMeta};

/// A reusable build definition: composes a producer against a store.
///
/// The same definition can be spliced into a larger build with
/// [`sub_build`] or orchestrated standalone via
/// [`Build::run_def`](crate::Build::run_def); whether root orchestration
/// happens is always the caller's explicit choice.
pub trait BuildDef: Send + Sync + 'static {
    /// Composes this build's producer against the given store.
    fn compose(&self, store: &BuildStore) -> OpRef;
}

impl<F> BuildDef for F
where
    F: Fn(&BuildStore) -> OpRef + Send + Sync + 'static,
{
    fn compose(&self, store: &BuildStore) -> OpRef {
        self(store)
    }
}

/// Wraps a process spec as a composable operation.
pub fn run(spec: ProcessSpec) -> OpRef {
    Arc::new(ProcessTask::new(spec))
}

/// Wraps a synchronous callback as a composable operation.
pub fn step<F>(info: TaskInfo, f: F) -> OpRef
where
    F: Fn(&StepAction) -> StepResult + Send + Sync + 'static,
{
    Arc::new(StepTask::new_sync(info, f))
}

/// Wraps an asynchronous callback as a composable operation.
///
/// The callback owns its [`StepAction`] handle and must call
/// `done`/`error` on it.
pub fn step_async<F, Fut>(info: TaskInfo, f: F) -> OpRef
where
    F: Fn(StepAction) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(StepTask::new_async(info, f))
}

/// Concatenates operations: each starts only after the previous one
/// completed, and a failure prevents the rest from ever starting.
pub fn serial(ops: Vec<OpRef>) -> OpRef {
    Arc::new(Serial { ops })
}

/// Interleaves operations: all start together; the first failure cancels
/// every still-running sibling, and the combinator waits for all of them
/// to wind down before propagating the failure.
pub fn parallel(ops: Vec<OpRef>) -> OpRef {
    Arc::new(Parallel { ops })
}

/// Conditional branch. The predicate is evaluated against current state
/// only when this node is reached, never at composition time. With no
/// else-branch and a false predicate the node contributes no events and
/// completes immediately.
pub fn iif<F>(condition: F, if_op: OpRef, else_op: Option<OpRef>) -> OpRef
where
    F: Fn(&BuildState) -> bool + Send + Sync + 'static,
{
    Arc::new(Conditional {
        condition: Arc::new(condition),
        if_op,
        else_op,
    })
}

/// Splices another build definition into the current composition.
///
/// The sub-build gets its own store, linked under the current one (live
/// parent reads, disjoint task-id range), and shares the surrounding
/// run's event channel and cancellation scope. No independent
/// orchestration happens.
pub fn sub_build(def: impl BuildDef) -> OpRef {
    Arc::new(SubBuild { def: Arc::new(def) })
}

/// Emits a single anonymous output line.
pub fn log(message: impl Into<String>) -> OpRef {
    Arc::new(LogOp {
        message: message.into(),
    })
}

struct Serial {
    ops: Vec<OpRef>,
}

#[async_trait]
impl Operation for Serial {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        for op in &self.ops {
            if ctx.cancel.is_cancelled() {
                return Err(BuildError::Canceled);
            }
            op.execute(ctx).await?;
        }
        Ok(())
    }
}

struct Parallel {
    ops: Vec<OpRef>,
}

#[async_trait]
impl Operation for Parallel {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        // one shared scope below this node: cancelling it reaches every
        // sibling but not the rest of the build
        let branch = ctx.cancel.child_token();
        let mut set = JoinSet::new();
        for op in &self.ops {
            let op = Arc::clone(op);
            let child_ctx = ctx.with_cancel(branch.child_token());
            set.spawn(async move { op.execute(&child_ctx).await });
        }

        let mut first_error: Option<BuildError> = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|join_err| {
                Err(BuildError::Callback {
                    message: format!("task aborted: {join_err}"),
                })
            });
            if let Err(e) = result {
                if first_error.is_none() && !e.is_cancellation() {
                    debug!(error = %e, "parallel branch failed, cancelling siblings");
                    branch.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if ctx.cancel.is_cancelled() => Err(BuildError::Canceled),
            None => Ok(()),
        }
    }
}

struct Conditional {
    condition: Arc<dyn Fn(&BuildState) -> bool + Send + Sync>,
    if_op: OpRef,
    else_op: Option<OpRef>,
}

#[async_trait]
impl Operation for Conditional {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        let condition = Arc::clone(&self.condition);
        if ctx.store.conditional(move |s| condition(s)) {
            self.if_op.execute(ctx).await
        } else if let Some(else_op) = &self.else_op {
            else_op.execute(ctx).await
        } else {
            Ok(())
        }
    }
}

struct SubBuild {
    def: Arc<dyn BuildDef>,
}

#[async_trait]
impl Operation for SubBuild {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        let child_store = BuildStore::child_of(&ctx.store);
        let op = self.def.compose(&child_store);
        op.execute(&ctx.with_store(child_store)).await
    }
}

struct LogOp {
    message: String,
}

#[async_trait]
impl Operation for LogOp {
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError> {
        ctx.events.emit(TaskEvent::data(
            TaskMeta::anonymous(),
            self.message.clone(),
            LogLevel::Plain,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventChannel;
    use crate::store::initial_state;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        result: Result<(), BuildError>,
        live: Vec<TaskEvent>,
        side: Vec<TaskEvent>,
        store: BuildStore,
    }

    async fn run_op(op: OpRef) -> Harness {
        run_op_with_state(op, initial_state()).await
    }

    async fn run_op_with_state(op: OpRef, state: BuildState) -> Harness {
        let store = BuildStore::with_state(state);
        let (events, mut rx) = EventChannel::pair();
        let ctx = ExecContext::new(store.clone(), events, CancellationToken::new());

        let result = op.execute(&ctx).await;
        drop(ctx);

        let mut live = Vec::new();
        while let Ok(ev) = rx.live.try_recv() {
            live.push(ev);
        }
        let mut side = Vec::new();
        while let Ok(ev) = rx.side.try_recv() {
            side.push(ev);
        }
        Harness {
            result,
            live,
            side,
            store,
        }
    }

    fn named_starts(events: &[TaskEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Start { task, .. } => Some(task.label()),
                _ => None,
            })
            .collect()
    }

    fn ok_step(name: &str) -> OpRef {
        step(TaskInfo::named(name.to_string()), |_| Ok(None))
    }

    fn failing_step(name: &str) -> OpRef {
        step(TaskInfo::named(name.to_string()), |_| Err("boom".into()))
    }

    #[tokio::test]
    async fn serial_runs_in_declared_order() {
        let h = run_op(serial(vec![ok_step("one"), ok_step("two"), ok_step("three")])).await;

        assert!(h.result.is_ok());
        assert_eq!(named_starts(&h.live), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn serial_failure_prevents_later_producers_from_starting() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let never = step(TaskInfo::named("never"), move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(None)
        });

        let h = run_op(serial(vec![ok_step("first"), failing_step("second"), never])).await;

        assert!(matches!(h.result, Err(BuildError::Callback { .. })));
        assert_eq!(named_starts(&h.live), vec!["first", "second"]);
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!h.store.select(|s| s.success()));
    }

    #[tokio::test]
    async fn parallel_merges_branches_and_preserves_per_branch_order() {
        let slow = step_async(TaskInfo::named("slow"), |action| async move {
            action.log("slow-1");
            tokio::time::sleep(Duration::from_millis(60)).await;
            action.log("slow-2");
            action.done();
        });
        let fast = step_async(TaskInfo::named("fast"), |action| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            action.log("fast-1");
            action.done();
        });

        let h = run_op(parallel(vec![slow, fast])).await;
        assert!(h.result.is_ok());

        let texts: Vec<&str> = h
            .live
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Data { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        let pos = |needle: &str| texts.iter().position(|t| *t == needle).unwrap();
        assert!(pos("slow-1") < pos("slow-2"));
        // real arrival order: the fast branch lands between the slow ones
        assert!(pos("slow-1") < pos("fast-1"));
        assert!(pos("fast-1") < pos("slow-2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parallel_failure_cancels_running_siblings() {
        let sleeper = run(ProcessSpec::new("sh")
            .args(["-c", "sleep 30"])
            .named("sleeper"));
        let failing = step_async(TaskInfo::named("bad"), |action| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            action.error("branch failed");
        });

        let started = tokio::time::Instant::now();
        let h = run_op(parallel(vec![sleeper, failing])).await;

        assert!(matches!(h.result, Err(BuildError::Callback { .. })));
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "sibling must be cancelled, not awaited to completion"
        );
        // the cancelled process reports its teardown on the side channel
        assert!(h.side.iter().any(|e| matches!(
            e,
            TaskEvent::Data { text, .. } if text.contains("process stopped after")
        )));
        assert!(h.side.iter().any(TaskEvent::is_terminal));
    }

    #[tokio::test]
    async fn iif_false_without_else_contributes_nothing() {
        let h = run_op(iif(|_| false, ok_step("skipped"), None)).await;

        assert!(h.result.is_ok());
        assert!(h.live.is_empty());
    }

    #[tokio::test]
    async fn iif_selects_exactly_one_branch() {
        let h = run_op(iif(
            |_| true,
            ok_step("taken"),
            Some(ok_step("not-taken")),
        ))
        .await;
        assert_eq!(named_starts(&h.live), vec!["taken"]);

        let h = run_op(iif(
            |_| false,
            ok_step("not-taken"),
            Some(ok_step("taken")),
        ))
        .await;
        assert_eq!(named_starts(&h.live), vec!["taken"]);
    }

    #[tokio::test]
    async fn iif_evaluates_lazily_against_current_state() {
        let set_flag = step(TaskInfo::named("set"), |action| {
            action.set_state(BuildState::default().with_ext("deploy", true));
            Ok(None)
        });
        let guarded = iif(
            |s| s.get("deploy").and_then(|v| v.as_bool()).unwrap_or(false),
            ok_step("deploying"),
            None,
        );

        let h = run_op(serial(vec![set_flag, guarded])).await;
        assert_eq!(named_starts(&h.live), vec!["set", "deploying"]);
    }

    #[tokio::test]
    async fn iif_can_branch_on_prior_failure() {
        let fail_quietly = step(TaskInfo::named("fails"), |action| {
            action.set_state(BuildState::default().with_success(false));
            Ok(None)
        });
        let cleanup = iif(|s| !s.success(), ok_step("cleanup"), None);

        let h = run_op(serial(vec![fail_quietly, cleanup])).await;
        assert_eq!(named_starts(&h.live), vec!["fails", "cleanup"]);
    }

    #[tokio::test]
    async fn sub_build_links_a_child_store_and_shares_the_stream() {
        let def = |store: &BuildStore| -> OpRef {
            assert!(store.is_linked());
            serial(vec![
                step(TaskInfo::named("inner"), |action| {
                    // reads fall through to the embedding build's layer
                    let flavor = action.select(|s| {
                        s.get("flavor").and_then(|v| v.as_str().map(String::from))
                    });
                    Ok(flavor)
                }),
            ])
        };

        let h = run_op_with_state(
            sub_build(def),
            initial_state().with_ext("flavor", "nightly"),
        )
        .await;

        assert!(h.result.is_ok());
        assert_eq!(named_starts(&h.live), vec!["inner"]);
        assert!(h.live.iter().any(|e| matches!(
            e,
            TaskEvent::Data { text, .. } if text == "nightly"
        )));
    }

    #[tokio::test]
    async fn sub_build_ids_stay_disjoint_from_the_parent() {
        let op = serial(vec![
            ok_step("outer-a"),
            sub_build(|_: &BuildStore| ok_step("inner")),
            ok_step("outer-b"),
        ]);
        let h = run_op(op).await;

        let ids: Vec<u64> = h
            .live
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Start { task, .. } => Some(task.id),
                _ => None,
            })
            .collect();
        let mut deduped = ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len(), "ids collided: {ids:?}");
    }

    #[tokio::test]
    async fn log_emits_one_anonymous_line() {
        let h = run_op(log("starting the nightly build")).await;

        assert!(h.result.is_ok());
        assert_eq!(h.live.len(), 1);
        match &h.live[0] {
            TaskEvent::Data { task, text, .. } => {
                assert_eq!(task.id, 0);
                assert_eq!(text, "starting the nightly build");
            }
            other => panic!("expected data event, got {other:?}"),
        }
    }
}
