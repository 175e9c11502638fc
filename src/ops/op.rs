//! # Operation: the composable producer abstraction.
//!
//! Everything that can appear in a build (a supervised process, an
//! in-process step, a combinator over other operations) implements
//! [`Operation`]. Executing an operation emits lifecycle events into the
//! context's channel and resolves to `Ok` when its subtree completed, or
//! to the `BuildError` that terminated it.
//!
//! The common handle type is [`OpRef`], an `Arc<dyn Operation>` suitable
//! for sharing across combinators and runs.
//!
//! ## Rules
//! - A leaf emits exactly one `Start`, then data, then one terminal event.
//! - Combinators never synthesize leaf events; they only order, merge, or
//!   skip the streams of their children.
//! - Cancellation arrives through the context's token and propagates
//!   top-down only.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BuildError;
use crate::events::EventChannel;
use crate::store::BuildStore;

/// Shared handle to a composable operation.
pub type OpRef = Arc<dyn Operation>;

/// Execution context threaded through a composition tree.
///
/// Cheap to clone; combinators derive variants with a child token or a
/// child store while sharing the same event channel.
#[derive(Clone, Debug)]
pub struct ExecContext {
    /// Build state shared by every operation in this (sub-)build.
    pub store: BuildStore,
    /// Live stream + side channel for this run.
    pub events: EventChannel,
    /// Cancellation token for this subtree.
    pub cancel: CancellationToken,
}

impl ExecContext {
    /// Creates a context for a run.
    pub fn new(store: BuildStore, events: EventChannel, cancel: CancellationToken) -> Self {
        ExecContext {
            store,
            events,
            cancel,
        }
    }

    /// Same channel and token, different store (used when embedding a
    /// sub-build with its own linked store).
    pub fn with_store(&self, store: BuildStore) -> Self {
        ExecContext {
            store,
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Same channel and store, child cancellation scope (used by
    /// `parallel` to cancel siblings independently).
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        ExecContext {
            store: self.store.clone(),
            events: self.events.clone(),
            cancel,
        }
    }
}

/// # A unit of build composition.
///
/// Implementors produce events into `ctx.events` and report their outcome
/// through the returned `Result`. An `Err` has always been preceded by a
/// terminal `Error` event for the failing leaf (cancellation being the
/// exception: a cancelled leaf delivers its terminal event through the
/// side channel instead).
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Executes this operation to completion, cancellation, or failure.
    async fn execute(&self, ctx: &ExecContext) -> Result<(), BuildError>;
}
