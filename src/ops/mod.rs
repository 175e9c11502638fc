//! Composition: the operation abstraction and its combinators.
//!
//! ## Contents
//! - [`Operation`], [`OpRef`], [`ExecContext`] — the producer abstraction
//! - [`serial`], [`parallel`], [`iif`], [`sub_build`], [`log`] —
//!   composition combinators
//! - [`run`], [`step`], [`step_async`] — leaf wrappers
//! - [`shell`] helpers — command-rewriting launchers (`npm`, `yarn`,
//!   `node`, `node_bin`, `shell`)

mod combinators;
mod op;
pub mod shell;

pub use combinators::{iif, log, parallel, run, serial, step, step_async, sub_build, BuildDef};
pub use op::{ExecContext, OpRef, Operation};
