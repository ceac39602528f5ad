use alloc::vec::Vec;

use lazy_reconcile::{
    CacheKey, CacheOptions, CachedItem, Clock, DatasetOperation, ItemBuilder, ItemNode, LazyCache,
    PredictiveOutcome, Reconciliation,
};

use crate::{DragReorder, ItemAnchor, capture_first_active_anchor, resolve_anchor};

/// A framework-neutral controller that owns a `lazy_reconcile::LazyCache` together with the item
/// builder and clock it needs, and runs the per-frame workflow.
///
/// This type does not hold any UI objects. Adapters drive it by calling:
/// - `on_layout(start, end)` once per layout pass with the visible window
/// - `on_idle(deadline, ..)` when the frame has spare time
/// - `on_dataset_change(ops, teardown)` when the data source reports a batch of changes
///
/// Removed nodes are always passed to a teardown callback; the controller never drops a node
/// silently.
#[derive(Debug)]
pub struct Controller<N, K, B, C> {
    cache: LazyCache<N, K>,
    builder: B,
    clock: C,
    drag: DragReorder,
}

impl<N, K, B, C> Controller<N, K, B, C>
where
    N: ItemNode,
    K: CacheKey,
    B: ItemBuilder<K, N>,
    C: Clock,
{
    /// Creates a controller. The option's `count` is replaced by `builder.total_count()`.
    pub fn new(options: CacheOptions, builder: B, clock: C) -> Self {
        let mut options = options;
        options.count = builder.total_count();
        Self {
            cache: LazyCache::new(options),
            builder,
            clock,
            drag: DragReorder::new(),
        }
    }

    pub fn from_parts(cache: LazyCache<N, K>, builder: B, clock: C) -> Self {
        Self {
            cache,
            builder,
            clock,
            drag: DragReorder::new(),
        }
    }

    pub fn cache(&self) -> &LazyCache<N, K> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut LazyCache<N, K> {
        &mut self.cache
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Mutable access to the builder, e.g. to swap in a new dataset before reporting the change.
    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    pub fn into_parts(self) -> (LazyCache<N, K>, B, C) {
        (self.cache, self.builder, self.clock)
    }

    /// Runs one layout pass for the window `[start, end]`.
    ///
    /// Moves the window, builds every index it is missing, and compacts the cache. Returns the
    /// realized items in index order. Nodes evicted along the way are passed to `teardown`.
    pub fn on_layout(
        &mut self,
        start: usize,
        end: usize,
        mut teardown: impl FnMut(K, N),
    ) -> Vec<CachedItem<K>> {
        self.cache.set_active_range(start, end);
        for index in self.cache.missing_in_range() {
            self.cache.get_or_build(&mut self.builder, index, true, false);
        }
        let items = self.cache.compact();
        for (key, node) in self.cache.take_disposed() {
            teardown(key, node);
        }
        items
    }

    /// Spends idle time until `deadline` building items around the window.
    pub fn on_idle(
        &mut self,
        deadline: u64,
        constraint: Option<&N::Constraint>,
        can_run_long_task: bool,
    ) -> PredictiveOutcome {
        self.cache.predictive_build(
            &mut self.builder,
            &self.clock,
            deadline,
            constraint,
            can_run_long_task,
        )
    }

    /// Applies a batch of dataset changes and tears down every node it removed.
    ///
    /// Update the builder to the new dataset first: a reload reads the new count from it.
    /// The returned reconciliation has an empty `disposed` list.
    pub fn on_dataset_change(
        &mut self,
        ops: impl IntoIterator<Item = DatasetOperation<K>>,
        mut teardown: impl FnMut(K, N),
    ) -> Reconciliation<K, N> {
        self.drag.cancel();
        let mut result = self.cache.on_dataset_change(&self.builder, ops);
        let disposed = core::mem::take(&mut result.disposed);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "lazy_reconcile_adapter",
            disposed = disposed.len(),
            first_affected = ?result.first_affected,
            "on_dataset_change"
        );
        for (key, node) in disposed {
            teardown(key, node);
        }
        result
    }

    pub fn capture_first_active_anchor(&self) -> Option<ItemAnchor<K>> {
        capture_first_active_anchor(&self.cache)
    }

    /// Computes the window that keeps `anchor` at the same distance from the window start.
    ///
    /// `len` is the number of indices in the window. Returns `(start, end)` to pass to
    /// [`Controller::on_layout`], or `None` if the anchor's key cannot be found.
    pub fn restore_anchor(
        &self,
        anchor: &ItemAnchor<K>,
        len: usize,
        key_to_index: impl FnMut(&K) -> Option<usize>,
    ) -> Option<(usize, usize)> {
        let index = resolve_anchor(&self.cache, anchor, key_to_index)?;
        let count = self.cache.count();
        if count == 0 || len == 0 {
            return None;
        }
        let start = index.saturating_sub(anchor.offset_in_window);
        let end = start.saturating_add(len - 1).min(count - 1);
        Some((start, end))
    }

    /// Records a drag of the item at data index `from` to display index `to`.
    pub fn on_drag(&mut self, from: usize, to: usize) {
        self.drag.update(from, to);
    }

    pub fn drag(&self) -> &DragReorder {
        &self.drag
    }

    /// The realized node to draw at display `index`, following an ongoing drag.
    pub fn node_at_display(&self, index: usize) -> Option<&N> {
        self.cache.node(self.drag.convert(index))
    }

    /// Ends a drag and applies the resulting move.
    ///
    /// Returns `None` when no drag was active or the item was dropped where it started.
    pub fn on_drop(&mut self, mut teardown: impl FnMut(K, N)) -> Option<Reconciliation<K, N>> {
        let (from, to) = self.drag.finish()?;
        let mut result = self.cache.on_data_moved(from, to);
        for (key, node) in core::mem::take(&mut result.disposed) {
            teardown(key, node);
        }
        Some(result)
    }
}
