//! # Task identity: user-supplied info and the allocated descriptor.
//!
//! [`TaskInfo`] is what a caller attaches to a process or step when
//! declaring a build; [`TaskMeta`] is the descriptor the engine allocates
//! from it at start time and stamps onto every event the task emits.
//!
//! Allocation happens exactly once per leaf unit of work. The descriptor
//! is immutable afterwards; the only lazily-defaulted field is
//! `correlation_id`, which falls back to the store's reserved
//! `correlation_id` key when the caller did not set one.

use std::sync::Arc;

use crate::store::BuildStore;

/// Status messages a reporter may substitute for raw task output.
#[derive(Debug, Clone, Default)]
pub struct StatusMessage {
    /// Shown when the task starts.
    pub start: Option<Arc<str>>,
    /// Shown when the task completes successfully.
    pub success: Option<Arc<str>>,
    /// Shown when the task fails.
    pub fail: Option<Arc<str>>,
}

/// User-supplied task identity, attached when declaring a build.
#[derive(Debug, Clone, Default)]
pub struct TaskInfo {
    /// Human-readable task name.
    pub name: Option<Arc<str>>,
    /// Short prefix for line-oriented reporters.
    pub prefix: Option<Arc<str>>,
    /// Correlation id for CI systems that group output by flow.
    pub correlation_id: Option<Arc<str>>,
    /// Optional start/success/fail status messages.
    pub status_message: Option<StatusMessage>,
}

impl TaskInfo {
    /// Creates an info with just a name.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        TaskInfo {
            name: Some(name.into()),
            ..TaskInfo::default()
        }
    }

    /// Sets the reporting prefix.
    pub fn with_prefix(mut self, prefix: impl Into<Arc<str>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the correlation id explicitly.
    pub fn with_correlation_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the status messages.
    pub fn with_status_message(mut self, msg: StatusMessage) -> Self {
        self.status_message = Some(msg);
        self
    }
}

/// Allocated task descriptor, attached to every event.
#[derive(Debug, Clone, Default)]
pub struct TaskMeta {
    /// Unique id within the build hierarchy. `0` marks an anonymous
    /// descriptor (engine-level messages not tied to a leaf task).
    pub id: u64,
    /// Human-readable task name.
    pub name: Option<Arc<str>>,
    /// Short prefix for line-oriented reporters.
    pub prefix: Option<Arc<str>>,
    /// Correlation id, explicit or inherited from state at allocation.
    pub correlation_id: Option<Arc<str>>,
    /// Optional start/success/fail status messages.
    pub status_message: Option<StatusMessage>,
}

impl TaskMeta {
    /// Allocates a descriptor for one leaf unit of work.
    ///
    /// Draws the id from the store's hierarchy-unique counter and inherits
    /// `correlation_id` from state when `info` did not set one.
    pub fn allocate(info: &TaskInfo, store: &BuildStore) -> Self {
        let correlation_id = info
            .correlation_id
            .clone()
            .or_else(|| store.select(|s| s.correlation_id.clone().map(Arc::from)));
        TaskMeta {
            id: store.allocate_task_id(),
            name: info.name.clone(),
            prefix: info.prefix.clone(),
            correlation_id,
            status_message: info.status_message.clone(),
        }
    }

    /// Descriptor for engine-level events not tied to a leaf task.
    pub fn anonymous() -> Self {
        TaskMeta::default()
    }

    /// Name for use in engine messages; falls back to the task id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("task {}", self.id),
        }
    }
}
