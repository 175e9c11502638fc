//! # Reporter boundary.
//!
//! The orchestrator never formats output; it drives the composed event
//! stream into a [`Report`] implementation supplied by the presentation
//! layer. The engine only guarantees taxonomy-level events and the final
//! [`RunResult`].
//!
//! ## Delivery paths
//! - `on_event` — the ordered live stream of the run
//! - `on_late_event` — the side channel: events a task could not deliver
//!   on its (already detached) live stream during cancellation teardown
//! - `log_plain` / `log_timeout` — engine-level messages outside any task
//! - `on_complete` — called exactly once with the final result

use async_trait::async_trait;

use crate::core::RunResult;
use crate::events::TaskEvent;

/// Consumer of a build's event stream.
///
/// Implemented by the (external) presentation layer; the engine ships a
/// no-op sink and, behind the `logging` feature, a demo stdout sink.
#[async_trait]
pub trait Report: Send + Sync + 'static {
    /// Receives one event from the live stream, in order.
    async fn on_event(&self, event: &TaskEvent);

    /// Receives an event delivered through the side channel.
    ///
    /// Defaults to the live handler; override to render teardown
    /// messages distinctly.
    async fn on_late_event(&self, event: &TaskEvent) {
        self.on_event(event).await;
    }

    /// Called exactly once when the run is over.
    async fn on_complete(&self, result: &RunResult);

    /// Engine-level message not attached to any task.
    fn log_plain(&self, text: &str);

    /// Global-timeout message. Defaults to [`log_plain`](Self::log_plain).
    fn log_timeout(&self, text: &str) {
        self.log_plain(text);
    }
}

/// Discards everything. Used when no reporter was supplied and the demo
/// sink is not compiled in.
pub struct NullReporter;

#[async_trait]
impl Report for NullReporter {
    async fn on_event(&self, _event: &TaskEvent) {}

    async fn on_complete(&self, _result: &RunResult) {}

    fn log_plain(&self, _text: &str) {}
}
