//! # Build state: typed reserved keys plus a generic side table.
//!
//! [`BuildState`] is the value stored in one layer of a
//! [`BuildStore`](crate::BuildStore). Reserved configuration lives in
//! typed `Option` fields so that an unset key can fall through to the
//! parent layer; arbitrary user keys live in the `ext` side table as
//! tagged [`StateValue`]s.
//!
//! The same type doubles as the **patch** passed to `set_state`: merging
//! is a shallow overlay where every defined field/key of the patch wins
//! and everything else is left untouched. Nested values are replaced
//! wholesale, never mutated in place.
//!
//! ## Example
//! ```rust
//! use buildvisor::BuildState;
//!
//! let patch = BuildState::default()
//!     .with_success(false)
//!     .with_ext("release", true);
//! assert_eq!(patch.success, Some(false));
//! assert_eq!(patch.get("release").and_then(|v| v.as_bool()), Some(true));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::store::filter::EventFilter;

/// Which reporter implementation the orchestrator should resolve.
///
/// Rendering itself is an external collaborator; this key only names the
/// flavor the presentation layer should provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    /// Plain console-style reporting.
    Console,
    /// CI-service markup reporting (TeamCity-style service messages).
    TeamCity,
}

/// A dynamically-typed value in the user-extension side table.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// String value.
    Str(String),
}

impl StateValue {
    /// Returns the boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Str(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Str(v)
    }
}

/// One layer of build state; also the patch shape accepted by
/// [`BuildStore::set_state`](crate::BuildStore::set_state).
///
/// All reserved fields are `Option` so that `None` means "not defined in
/// this layer" and reads fall through to the parent chain.
#[derive(Clone, Default)]
pub struct BuildState {
    /// Halt the build if it runs longer than this. `0` disables.
    pub timeout_seconds: Option<u64>,
    /// Grace window after a stderr chunk before the build gives up.
    /// Lets a tool flush related error lines before failing. `0` disables.
    pub error_timeout_ms: Option<u64>,
    /// Reporter flavor to resolve at start.
    pub reporter_kind: Option<ReporterKind>,
    /// Prefix column width hint for the presentation layer.
    pub prefix_width: Option<usize>,
    /// Working directory for process tasks that do not set their own.
    pub working_dir: Option<PathBuf>,
    /// Correlation id inherited by task descriptors that do not set one.
    pub correlation_id: Option<String>,
    /// False once any build step has failed.
    pub success: Option<bool>,
    /// Store-scoped output filters, applied to every process task.
    pub event_filters: Option<Vec<EventFilter>>,
    /// User-defined extension keys.
    pub ext: HashMap<String, StateValue>,
}

impl BuildState {
    /// Overlays `patch` onto `self`: defined patch fields and present
    /// patch keys win, everything else is kept.
    pub fn merge_from(&mut self, patch: &BuildState) {
        if patch.timeout_seconds.is_some() {
            self.timeout_seconds = patch.timeout_seconds;
        }
        if patch.error_timeout_ms.is_some() {
            self.error_timeout_ms = patch.error_timeout_ms;
        }
        if patch.reporter_kind.is_some() {
            self.reporter_kind = patch.reporter_kind;
        }
        if patch.prefix_width.is_some() {
            self.prefix_width = patch.prefix_width;
        }
        if patch.working_dir.is_some() {
            self.working_dir = patch.working_dir.clone();
        }
        if patch.correlation_id.is_some() {
            self.correlation_id = patch.correlation_id.clone();
        }
        if patch.success.is_some() {
            self.success = patch.success;
        }
        if patch.event_filters.is_some() {
            self.event_filters = patch.event_filters.clone();
        }
        for (k, v) in &patch.ext {
            self.ext.insert(k.clone(), v.clone());
        }
    }

    /// Reads a user-extension key.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.ext.get(key)
    }

    /// `success`, defaulting to `true` when no layer has defined it.
    pub fn success(&self) -> bool {
        self.success.unwrap_or(true)
    }

    /// `error_timeout_ms`, defaulting to the initial-state value.
    pub fn error_timeout_ms(&self) -> u64 {
        self.error_timeout_ms.unwrap_or(DEFAULT_ERROR_TIMEOUT_MS)
    }

    /// `timeout_seconds`, defaulting to the initial-state value.
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    /// Store-scoped event filters (empty slice when unset).
    pub fn event_filters(&self) -> &[EventFilter] {
        self.event_filters.as_deref().unwrap_or(&[])
    }

    // ---- patch builders ----

    /// Sets `timeout_seconds` on this patch.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Sets `error_timeout_ms` on this patch.
    pub fn with_error_timeout_ms(mut self, ms: u64) -> Self {
        self.error_timeout_ms = Some(ms);
        self
    }

    /// Sets the reporter flavor on this patch.
    pub fn with_reporter_kind(mut self, kind: ReporterKind) -> Self {
        self.reporter_kind = Some(kind);
        self
    }

    /// Sets the working directory on this patch.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the correlation id on this patch.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the success flag on this patch.
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Sets the store-scoped filter list on this patch.
    pub fn with_event_filters(mut self, filters: Vec<EventFilter>) -> Self {
        self.event_filters = Some(filters);
        self
    }

    /// Sets a user-extension key on this patch.
    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.ext.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildState")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("error_timeout_ms", &self.error_timeout_ms)
            .field("reporter_kind", &self.reporter_kind)
            .field("prefix_width", &self.prefix_width)
            .field("working_dir", &self.working_dir)
            .field("correlation_id", &self.correlation_id)
            .field("success", &self.success)
            .field(
                "event_filters",
                &self.event_filters.as_ref().map(Vec::len),
            )
            .field("ext", &self.ext)
            .finish()
    }
}

/// Default global timeout: halt the build after one hour.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60 * 60;

/// Default error-grace window.
pub const DEFAULT_ERROR_TIMEOUT_MS: u64 = 1000;

/// Default prefix column width.
pub const DEFAULT_PREFIX_WIDTH: usize = 7;

/// State every root store is seeded with before caller overrides apply.
pub fn initial_state() -> BuildState {
    BuildState {
        timeout_seconds: Some(DEFAULT_TIMEOUT_SECONDS),
        error_timeout_ms: Some(DEFAULT_ERROR_TIMEOUT_MS),
        prefix_width: Some(DEFAULT_PREFIX_WIDTH),
        success: Some(true),
        event_filters: Some(Vec::new()),
        ..BuildState::default()
    }
}
