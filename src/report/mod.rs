//! Reporting boundary: the [`Report`] trait and built-in sinks.
//!
//! Rendering is an external collaborator; the engine only defines the
//! interface it drives. [`NullReporter`] is the silent fallback;
//! `LogReporter` (feature `logging`) is a demo stdout sink.

#[cfg(feature = "logging")]
mod log;
mod reporter;

#[cfg(feature = "logging")]
pub use log::LogReporter;
pub use reporter::{NullReporter, Report};
