//! Build state: the store, its value model, and output filters.
//!
//! ## Contents
//! - [`BuildStore`] — hierarchically-linked shared state handle
//! - [`BuildState`], [`StateValue`], [`ReporterKind`] — typed reserved
//!   keys plus the user-extension side table
//! - [`EventFilter`], [`FilterAction`], [`filter_fn`], [`apply_filters`]
//!   per-chunk output classification hooks
//! - [`initial_state`] — defaults every root store is seeded with

mod filter;
mod state;
mod store;

pub use filter::{apply_filters, filter_fn, EventFilter, FilterAction};
pub use state::{
    initial_state, BuildState, ReporterKind, StateValue, DEFAULT_ERROR_TIMEOUT_MS,
    DEFAULT_PREFIX_WIDTH, DEFAULT_TIMEOUT_SECONDS,
};
pub use store::BuildStore;
