//! # Event filters: per-chunk output classification hooks.
//!
//! A filter inspects one output chunk of a process task and decides what
//! happens to it:
//!
//! - [`FilterAction::Keep`] — pass the chunk through unchanged
//! - [`FilterAction::Suppress`] — drop the chunk entirely
//! - [`FilterAction::Rewrite`] — replace the chunk's content
//! - `Err(message)` — fail the owning task (a raising filter is a build
//!   failure, surfaced as [`BuildError::Filter`](crate::BuildError::Filter))
//!
//! Filters come from two scopes: the store's reserved `event_filters` key
//! (applied to every process task in that store's hierarchy view) and the
//! task's own filter list (applied after the store-scoped ones). Within a
//! scope, registration order is preserved; a rewrite feeds the rewritten
//! text to the next filter; a suppression short-circuits the rest of the
//! chain for that chunk.

use std::sync::Arc;

/// Decision returned by an event filter for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// Pass the chunk through unchanged.
    Keep,
    /// Drop the chunk; nothing is emitted for it.
    Suppress,
    /// Replace the chunk's content with the given text.
    Rewrite(String),
}

/// A shareable per-chunk filter function.
///
/// Returning `Err` terminates the owning task as a failure.
pub type EventFilter = Arc<dyn Fn(&str) -> Result<FilterAction, String> + Send + Sync>;

/// Wraps a closure as an [`EventFilter`].
///
/// # Example
/// ```rust
/// use buildvisor::{filter_fn, FilterAction};
///
/// let quiet = filter_fn(|chunk| {
///     if chunk.contains("npm notice") {
///         Ok(FilterAction::Suppress)
///     } else {
///         Ok(FilterAction::Keep)
///     }
/// });
/// assert_eq!(quiet("npm notice new version"), Ok(FilterAction::Suppress));
/// ```
pub fn filter_fn<F>(f: F) -> EventFilter
where
    F: Fn(&str) -> Result<FilterAction, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs a chunk through the store-scoped then task-scoped filter chains.
///
/// Returns `Ok(None)` when a filter suppressed the chunk, `Ok(Some(text))`
/// with the (possibly rewritten) text otherwise, and `Err` when a filter
/// raised.
pub fn apply_filters(
    store_filters: &[EventFilter],
    task_filters: &[EventFilter],
    text: &str,
) -> Result<Option<String>, String> {
    let mut current = text.to_string();
    for filter in store_filters.iter().chain(task_filters) {
        match filter(&current)? {
            FilterAction::Keep => {}
            FilterAction::Suppress => return Ok(None),
            FilterAction::Rewrite(replacement) => current = replacement,
        }
    }
    Ok(Some(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_passes_text_through() {
        let out = apply_filters(&[filter_fn(|_| Ok(FilterAction::Keep))], &[], "hello");
        assert_eq!(out, Ok(Some("hello".to_string())));
    }

    #[test]
    fn suppress_short_circuits_remaining_filters() {
        let out = apply_filters(
            &[
                filter_fn(|_| Ok(FilterAction::Suppress)),
                filter_fn(|_| Err("must not run".to_string())),
            ],
            &[],
            "hello",
        );
        assert_eq!(out, Ok(None));
    }

    #[test]
    fn rewrite_feeds_next_filter() {
        let out = apply_filters(
            &[filter_fn(|_| Ok(FilterAction::Rewrite("first".into())))],
            &[filter_fn(|text| {
                Ok(FilterAction::Rewrite(format!("{text}+second")))
            })],
            "ignored",
        );
        assert_eq!(out, Ok(Some("first+second".to_string())));
    }

    #[test]
    fn store_filters_run_before_task_filters() {
        let out = apply_filters(
            &[filter_fn(|_| Ok(FilterAction::Suppress))],
            &[filter_fn(|_| Err("task filter ran first".to_string()))],
            "x",
        );
        assert_eq!(out, Ok(None));
    }

    #[test]
    fn raising_filter_propagates_the_error() {
        let out = apply_filters(&[filter_fn(|_| Err("bad chunk".to_string()))], &[], "x");
        assert_eq!(out, Err("bad chunk".to_string()));
    }
}
