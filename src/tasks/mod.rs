//! Leaf producers: process and step tasks, and their shared identity.
//!
//! This module provides the two leaf operation types and everything they
//! hang off:
//! - [`ProcessSpec`] / [`ProcessTask`] — supervised external command
//! - [`StepTask`] / [`StepAction`] — in-process callback with the same
//!   lifecycle shape
//! - [`TaskInfo`] / [`TaskMeta`] — identity before and after allocation
//! - [`StopSignal`] / [`kill_tree`] — process-tree termination

mod kill;
mod meta;
mod process;
mod step;

pub use kill::{kill_tree, StopSignal};
pub use meta::{StatusMessage, TaskInfo, TaskMeta};
pub use process::{ArgSource, ProcessSpec, ProcessTask, ResponseFn};
pub use step::{StepAction, StepResult, StepTask};
