//! # BuildStore: hierarchically-scoped shared build state.
//!
//! One [`BuildStore`] exists per build invocation (root or embedded) and
//! lives exactly as long as that build's composed producer. It is shared
//! by reference only; the handle is a cheap `Arc` clone.
//!
//! ## Hierarchy
//! ```text
//! root store ◄──── parent link ──── child store (embedded sub-build)
//!   local layer                       local layer
//!        read(key): child local first, then parent chain (live, not a
//!        snapshot: a later parent write is visible to the child)
//! ```
//!
//! ## Rules
//! - `set_state` is a shallow merge into the **local** layer only.
//! - `link` is one-time and one-directional; it also seeds the child's
//!   task-id counter into a range disjoint from every sibling's.
//! - `allocate_task_id` is a single atomic fetch-add; two concurrently
//!   starting leaves can never observe the same id.
//! - Re-linking an already linked store is a programming error and panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::store::state::BuildState;

/// Multiplier applied when seeding a child store's id counter.
///
/// Each link consumes one id from the parent, so sibling sub-builds that
/// link back-to-back still land in disjoint ranges as long as a single
/// layer allocates fewer ids than the stride.
pub(crate) const TASK_ID_STRIDE: u64 = 1000;

/// Shared, hierarchically-linked build state store.
///
/// Cloning the handle shares the same underlying layer.
///
/// # Example
/// ```rust
/// use buildvisor::{BuildState, BuildStore};
///
/// let store = BuildStore::new();
/// store.set_state(BuildState::default().with_ext("flavor", "release"));
/// let flavor = store.select(|s| s.get("flavor").and_then(|v| v.as_str().map(String::from)));
/// assert_eq!(flavor.as_deref(), Some("release"));
/// ```
#[derive(Clone, Debug)]
pub struct BuildStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    local: RwLock<BuildState>,
    parent: OnceLock<BuildStore>,
    next_task_id: AtomicU64,
}

impl Default for BuildStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildStore {
    /// Creates an unlinked store with an empty local layer.
    ///
    /// Ids allocated from an unlinked (root) store start at 1.
    pub fn new() -> Self {
        BuildStore {
            inner: Arc::new(StoreInner {
                local: RwLock::new(BuildState::default()),
                parent: OnceLock::new(),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a store whose local layer starts from `state`.
    pub fn with_state(state: BuildState) -> Self {
        let store = Self::new();
        store.set_state(state);
        store
    }

    /// Creates a new store and links it under `parent`.
    pub fn child_of(parent: &BuildStore) -> Self {
        let child = Self::new();
        child.link(parent);
        child
    }

    /// Read-only projection over the merged local + ancestor view.
    ///
    /// The selector sees the nearest defined value for every key; the
    /// merge happens at call time, so parent changes made after linking
    /// are visible on the next read.
    pub fn select<T>(&self, selector: impl FnOnce(&BuildState) -> T) -> T {
        selector(&self.merged())
    }

    /// Same as [`select`](Self::select), typed for branch predicates.
    pub fn conditional(&self, selector: impl FnOnce(&BuildState) -> bool) -> bool {
        self.select(selector)
    }

    /// Shallow-merges `patch` into the local layer.
    ///
    /// Linked reads still fall through to the parent for keys the patch
    /// did not define.
    pub fn set_state(&self, patch: BuildState) {
        self.inner
            .local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_from(&patch);
    }

    /// Links this store under `parent`. One-time.
    ///
    /// Seeds the local task-id counter into a range disjoint from the
    /// parent and from previously linked siblings: linking allocates one
    /// id from the parent and multiplies by [`TASK_ID_STRIDE`].
    ///
    /// # Panics
    /// Panics if this store is already linked; that is a programming
    /// error in build composition, not a runtime condition.
    pub fn link(&self, parent: &BuildStore) {
        let base = (parent.allocate_task_id() + 1) * TASK_ID_STRIDE;
        if self.inner.parent.set(parent.clone()).is_err() {
            panic!("build store is already linked to a parent");
        }
        self.inner.next_task_id.store(base, Ordering::SeqCst);
    }

    /// Allocates the next task id.
    ///
    /// A single atomic fetch-add: the read of the current counter and the
    /// commit of its increment are one step, so interleaved allocations
    /// from parallel branches can never double-assign an id.
    pub fn allocate_task_id(&self) -> u64 {
        self.inner.next_task_id.fetch_add(1, Ordering::SeqCst)
    }

    /// True once this store has been linked under a parent.
    pub fn is_linked(&self) -> bool {
        self.inner.parent.get().is_some()
    }

    /// Marks the whole run as failed.
    ///
    /// `success` is seeded at the root layer, so the flag is flipped there
    /// rather than in the failing task's local layer: every store in the
    /// hierarchy reads it through the parent chain, and a later
    /// conditional step anywhere in the run can branch on the failure.
    /// The flag is monotone: nothing in the engine ever resets it.
    pub(crate) fn mark_failed(&self) {
        self.root().set_state(BuildState::default().with_success(false));
    }

    fn root(&self) -> BuildStore {
        match self.inner.parent.get() {
            Some(parent) => parent.root(),
            None => self.clone(),
        }
    }

    fn merged(&self) -> BuildState {
        let local = self
            .inner
            .local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match self.inner.parent.get() {
            Some(parent) => {
                let mut merged = parent.merged();
                merged.merge_from(&local);
                merged
            }
            None => local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::state::initial_state;

    #[test]
    fn child_falls_back_to_parent_and_sees_later_parent_writes() {
        let parent = BuildStore::with_state(initial_state());
        let child = BuildStore::child_of(&parent);

        parent.set_state(BuildState::default().with_ext("branch", "main"));
        assert_eq!(
            child.select(|s| s.get("branch").and_then(|v| v.as_str().map(String::from))),
            Some("main".to_string())
        );

        // live reference: a parent update after the first read is visible
        parent.set_state(BuildState::default().with_ext("branch", "release"));
        assert_eq!(
            child.select(|s| s.get("branch").and_then(|v| v.as_str().map(String::from))),
            Some("release".to_string())
        );
    }

    #[test]
    fn local_layer_shadows_parent() {
        let parent = BuildStore::with_state(BuildState::default().with_ext("k", 1i64));
        let child = BuildStore::child_of(&parent);
        child.set_state(BuildState::default().with_ext("k", 2i64));

        assert_eq!(child.select(|s| s.get("k").and_then(|v| v.as_int())), Some(2));
        assert_eq!(parent.select(|s| s.get("k").and_then(|v| v.as_int())), Some(1));
    }

    #[test]
    fn child_writes_never_leak_into_the_parent() {
        let parent = BuildStore::with_state(initial_state());
        let child = BuildStore::child_of(&parent);

        child.set_state(BuildState::default().with_success(false));
        assert!(!child.select(|s| s.success()));
        assert!(parent.select(|s| s.success()));
    }

    #[test]
    fn ids_are_distinct_across_the_hierarchy_and_increasing_per_layer() {
        let root = BuildStore::new();
        let a = BuildStore::child_of(&root);
        let b = BuildStore::child_of(&root);

        let mut seen = Vec::new();
        for store in [&root, &a, &b] {
            let first = store.allocate_task_id();
            let second = store.allocate_task_id();
            assert!(second > first);
            seen.push(first);
            seen.push(second);
        }
        let mut deduped = seen.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), seen.len(), "task ids collided: {seen:?}");
    }

    #[test]
    fn conditional_reads_the_merged_view() {
        let store = BuildStore::with_state(initial_state());
        assert!(store.conditional(|s| s.success()));
        store.set_state(BuildState::default().with_success(false));
        assert!(!store.conditional(|s| s.success()));
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn relinking_panics() {
        let p1 = BuildStore::new();
        let p2 = BuildStore::new();
        let child = BuildStore::child_of(&p1);
        child.link(&p2);
    }
}
