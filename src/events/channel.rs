//! # Event channel: live stream plus cancellation side channel.
//!
//! [`EventChannel`] is a thin wrapper around two unbounded
//! [`tokio::sync::mpsc`] senders that gives every task producer the same
//! two delivery paths the orchestrator wires up:
//!
//! ```text
//! Producers (many):                      Consumer (one):
//!   process task ──┐
//!   step task    ──┼── emit() ───► live ───► Report::on_event
//!   combinators  ──┤
//!                  └── emit_late() ► side ───► Report::on_late_event
//! ```
//!
//! ## Rules
//! - `emit` never blocks; if the live receiver is already gone (the run
//!   was torn down while the producer was still finishing), the event
//!   falls through to the side channel instead of being dropped.
//! - `emit_late` is for events a task can no longer deliver on the live
//!   stream: kill confirmations and terminal events produced during
//!   cancellation teardown.
//! - Neither path provides backpressure; event volume is bounded by task
//!   output, which the error-grace policy already coalesces.

use tokio::sync::mpsc;
use tracing::debug;

use super::event::TaskEvent;

/// Sender half shared by every producer in one build run.
#[derive(Clone, Debug)]
pub struct EventChannel {
    live: mpsc::UnboundedSender<TaskEvent>,
    side: mpsc::UnboundedSender<TaskEvent>,
}

/// Receiver halves held by the orchestrator.
#[derive(Debug)]
pub struct EventReceivers {
    /// Ordered live stream of the run.
    pub live: mpsc::UnboundedReceiver<TaskEvent>,
    /// Side channel for post-cancellation delivery.
    pub side: mpsc::UnboundedReceiver<TaskEvent>,
}

impl EventChannel {
    /// Creates a connected channel pair for one build run.
    pub fn pair() -> (EventChannel, EventReceivers) {
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        let (side_tx, side_rx) = mpsc::unbounded_channel();
        (
            EventChannel {
                live: live_tx,
                side: side_tx,
            },
            EventReceivers {
                live: live_rx,
                side: side_rx,
            },
        )
    }

    /// Emits an event on the live stream.
    ///
    /// Falls back to the side channel when the live receiver has been
    /// dropped, so a terminal event is never lost.
    pub fn emit(&self, ev: TaskEvent) {
        if let Err(e) = self.live.send(ev) {
            debug!(kind = e.0.kind_label(), "live stream closed, rerouting event to side channel");
            let _ = self.side.send(e.0);
        }
    }

    /// Emits an event on the side channel.
    ///
    /// Used during cancellation teardown, after the consumer has detached
    /// from the per-task live stream.
    pub fn emit_late(&self, ev: TaskEvent) {
        if self.side.send(ev).is_err() {
            debug!("side channel closed, late event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use crate::tasks::TaskMeta;
    use std::time::SystemTime;

    #[tokio::test]
    async fn emit_reaches_live_receiver() {
        let (tx, mut rx) = EventChannel::pair();
        tx.emit(TaskEvent::data(TaskMeta::anonymous(), "hi", LogLevel::Plain));
        let ev = rx.live.recv().await.unwrap();
        assert_eq!(ev.kind_label(), "data");
    }

    #[tokio::test]
    async fn emit_falls_back_to_side_channel() {
        let (tx, mut rx) = EventChannel::pair();
        drop(rx.live);
        tx.emit(TaskEvent::done(TaskMeta::anonymous(), SystemTime::now()));
        let ev = rx.side.recv().await.unwrap();
        assert!(ev.is_terminal());
    }

    #[tokio::test]
    async fn emit_late_bypasses_live_stream() {
        let (tx, mut rx) = EventChannel::pair();
        tx.emit_late(TaskEvent::data(TaskMeta::anonymous(), "late", LogLevel::Info));
        assert!(rx.live.try_recv().is_err());
        assert_eq!(rx.side.recv().await.unwrap().kind_label(), "data");
    }
}
