use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use crate::classify::{Carried, Classified, IntentKind, OperationIntent, Residence};
use crate::store::Slot;
use crate::{
    CacheError, CacheKey, DatasetOperation, ItemBuilder, ItemNode, LazyCache, Reconciliation,
};

/// An item of the active view, lifted out of the cache for one batch.
#[derive(Debug)]
pub(crate) struct Entry<K, N> {
    pub(crate) key: K,
    pub(crate) node: Option<N>,
    pub(crate) parked: bool,
}

/// Everything one batch works on, taken out of the cache so the classifier and both passes can
/// run (and be tested) without touching the live store.
#[derive(Debug)]
pub(crate) struct ReconciliationContext<K, N> {
    /// Dataset size before the batch.
    pub(crate) total_count: usize,
    /// Active view by original index.
    pub(crate) active: BTreeMap<usize, Entry<K, N>>,
    /// Retained nodes with a known original index.
    pub(crate) expiring: BTreeMap<usize, (K, N)>,
    /// Retained nodes without a usable index. They survive the batch untouched.
    pub(crate) unplaced: Vec<(K, N)>,
    pub(crate) intents: BTreeMap<usize, OperationIntent<K, N>>,
    pub(crate) disposed: Vec<(K, N)>,
    pub(crate) rejected: Vec<CacheError>,
    pub(crate) first_affected: Option<usize>,
}

impl<K: CacheKey, N> ReconciliationContext<K, N> {
    pub(crate) fn new(total_count: usize) -> Self {
        Self {
            total_count,
            active: BTreeMap::new(),
            expiring: BTreeMap::new(),
            unplaced: Vec::new(),
            intents: BTreeMap::new(),
            disposed: Vec::new(),
            rejected: Vec::new(),
            first_affected: None,
        }
    }

    pub(crate) fn insert_active(&mut self, index: usize, entry: Entry<K, N>) {
        if let Some(prev) = self.active.insert(index, entry) {
            if let Some(node) = prev.node {
                self.unplaced.push((prev.key, node));
            }
        }
    }

    pub(crate) fn insert_expiring(&mut self, index: Option<usize>, key: K, node: N) {
        let Some(index) = index else {
            self.unplaced.push((key, node));
            return;
        };
        if let Some(prev) = self.expiring.insert(index, (key, node)) {
            self.unplaced.push(prev);
        }
    }

    /// Net size change of every accepted operation.
    pub(crate) fn net_delta(&self) -> isize {
        self.intents.values().map(|i| i.net_count_delta).sum()
    }

    /// Pass A: the cumulative shift function over the recorded intents.
    pub(crate) fn shift_map(&self) -> ShiftMap {
        let mut steps = Vec::with_capacity(self.intents.len());
        let mut change = 0isize;
        for (&index, intent) in self.intents.iter() {
            let before = change;
            change += intent.net_count_delta;
            steps.push((index, before, change));
        }
        ShiftMap { steps }
    }
}

/// The monotonic step function mapping an original index to its post-batch index.
///
/// One `(original_index, before, after)` step per intent, in ascending index order, where
/// `before`/`after` are the cumulative size change without/with that intent applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ShiftMap {
    pub(crate) steps: Vec<(usize, isize, isize)>,
}

impl ShiftMap {
    fn step(&self, index: usize) -> Option<(usize, isize, isize)> {
        let at = self.steps.partition_point(|&(i, _, _)| i <= index);
        at.checked_sub(1).map(|at| self.steps[at])
    }

    /// `after` of the greatest intent index `<= index`, or 0.
    pub(crate) fn shift(&self, index: usize) -> isize {
        self.step(index).map_or(0, |(_, _, after)| after)
    }

    /// Cumulative change strictly before the intent at `index`.
    pub(crate) fn before(&self, index: usize) -> isize {
        match self.step(index) {
            Some((i, before, _)) if i == index => before,
            Some((_, _, after)) => after,
            None => 0,
        }
    }

    pub(crate) fn after(&self, index: usize) -> isize {
        self.shift(index)
    }

    /// Applies `delta` to `index`. `None` if the result would be negative.
    pub(crate) fn apply(index: usize, delta: isize) -> Option<usize> {
        index.checked_add_signed(delta)
    }
}

/// Where Pass B puts one item.
enum Placement<K, N> {
    Active { index: usize, key: K, node: Option<N> },
    Parked { index: usize, key: K, node: N },
    Expiring { index: Option<usize>, key: K, node: N },
}

impl<K, N> Placement<K, N> {
    fn carried(carried: Carried<K, N>, index: usize) -> Self {
        let Carried { key, node, origin } = carried;
        match (origin, node) {
            (Residence::Active, node) => Self::Active { index, key, node },
            (Residence::Parked, Some(node)) => Self::Parked { index, key, node },
            (Residence::Expiring, Some(node)) => Self::Expiring {
                index: Some(index),
                key,
                node,
            },
            (_, None) => Self::Active {
                index,
                key,
                node: None,
            },
        }
    }
}

impl<K: CacheKey, N> ReconciliationContext<K, N> {
    /// Pass B: replays every intent against the lifted items and returns their placements.
    ///
    /// Items untouched by an intent keep their residence and move by `shift`. Carried items are
    /// placed after them, so a relocation wins an index collision.
    fn replay(&mut self, shifts: &ShiftMap) -> Vec<Placement<K, N>> {
        let mut out = Vec::new();
        // Change targets already re-keyed from the active view.
        let mut changed = Vec::new();

        for (index, entry) in mem::take(&mut self.active) {
            let Entry { key, node, parked } = entry;
            let target = match self.intents.get(&index) {
                None => ShiftMap::apply(index, shifts.shift(index)),
                Some(intent) => match intent.kind {
                    IntentKind::Delete | IntentKind::MoveOut | IntentKind::Exchange => {
                        if let Some(node) = node {
                            self.disposed.push((key, node));
                        }
                        continue;
                    }
                    IntentKind::Change => {
                        let renamed = intent.new_key.clone().unwrap_or_else(|| key.clone());
                        if let Some(stale) = node {
                            self.disposed.push((key, stale));
                        }
                        changed.push(index);
                        if let Some(index) = ShiftMap::apply(index, shifts.after(index)) {
                            out.push(Placement::Active {
                                index,
                                key: renamed,
                                node: None,
                            });
                        }
                        continue;
                    }
                    IntentKind::MoveIn if intent.is_forward_move() => {
                        ShiftMap::apply(index, shifts.before(index))
                    }
                    IntentKind::Add | IntentKind::MoveIn => {
                        ShiftMap::apply(index, shifts.after(index))
                    }
                },
            };
            let Some(index) = target else {
                if let Some(node) = node {
                    self.disposed.push((key, node));
                }
                continue;
            };
            out.push(match (parked, node) {
                (true, Some(node)) => Placement::Parked { index, key, node },
                (_, node) => Placement::Active { index, key, node },
            });
        }

        for (index, (key, node)) in mem::take(&mut self.expiring) {
            let intent = self.intents.get(&index);
            let target = match intent.map(|i| (i.kind, i.is_forward_move())) {
                None => ShiftMap::apply(index, shifts.shift(index)),
                Some((IntentKind::Change, _)) => {
                    // The stale node goes; the key stays reserved unless the active view
                    // already re-keyed this index.
                    let renamed = intent
                        .and_then(|i| i.new_key.clone())
                        .unwrap_or_else(|| key.clone());
                    self.disposed.push((key, node));
                    if !changed.contains(&index) {
                        if let Some(index) = ShiftMap::apply(index, shifts.after(index)) {
                            out.push(Placement::Active {
                                index,
                                key: renamed,
                                node: None,
                            });
                        }
                    }
                    continue;
                }
                Some((IntentKind::MoveIn, true)) => ShiftMap::apply(index, shifts.before(index)),
                Some((IntentKind::Add | IntentKind::MoveIn, _)) => {
                    ShiftMap::apply(index, shifts.after(index))
                }
                Some(_) => None,
            };
            match target {
                Some(index) => out.push(Placement::Expiring {
                    index: Some(index),
                    key,
                    node,
                }),
                None => self.disposed.push((key, node)),
            }
        }

        for (key, node) in mem::take(&mut self.unplaced) {
            out.push(Placement::Expiring {
                index: None,
                key,
                node,
            });
        }

        for (index, intent) in mem::take(&mut self.intents) {
            let OperationIntent {
                kind,
                carried,
                extra_keys,
                from_diff_to,
                ..
            } = intent;
            let before = ShiftMap::apply(index, shifts.before(index));
            let after = ShiftMap::apply(index, shifts.after(index));
            match kind {
                IntentKind::Add => {
                    let Some(base) = before else { continue };
                    for (k, key) in extra_keys.into_iter().enumerate() {
                        out.push(Placement::Active {
                            index: base + k,
                            key,
                            node: None,
                        });
                    }
                }
                IntentKind::MoveIn => {
                    let target = if from_diff_to < 0 {
                        before.map(|i| i + 1)
                    } else {
                        before
                    };
                    self.relocate(&mut out, carried, target);
                }
                IntentKind::Exchange => self.relocate(&mut out, carried, after),
                IntentKind::Delete | IntentKind::Change | IntentKind::MoveOut => {}
            }
        }

        out
    }

    fn relocate(
        &mut self,
        out: &mut Vec<Placement<K, N>>,
        carried: Option<Carried<K, N>>,
        target: Option<usize>,
    ) {
        match (carried, target) {
            (Some(carried), Some(index)) => out.push(Placement::carried(carried, index)),
            (
                Some(Carried {
                    key,
                    node: Some(node),
                    ..
                }),
                None,
            ) => self.disposed.push((key, node)),
            _ => {}
        }
    }

    /// Lifts every carried node back out after a reload stopped classification.
    fn drain_for_reload(&mut self) -> Vec<(K, N)> {
        let mut nodes: Vec<(K, N)> = Vec::new();
        for (_, entry) in mem::take(&mut self.active) {
            if let Some(node) = entry.node {
                nodes.push((entry.key, node));
            }
        }
        nodes.extend(mem::take(&mut self.expiring).into_values());
        nodes.append(&mut self.unplaced);
        for (_, intent) in mem::take(&mut self.intents) {
            if let Some(Carried {
                key,
                node: Some(node),
                ..
            }) = intent.carried
            {
                nodes.push((key, node));
            }
        }
        nodes
    }
}

impl<N: ItemNode, K: CacheKey> LazyCache<N, K> {
    /// Applies a batch of dataset operations.
    ///
    /// Every index in the batch refers to the dataset as it was before the batch. Invalid or
    /// conflicting operations are skipped and reported in [`Reconciliation::rejected`]; the
    /// rest of the batch still applies. A `Reload` discards everything classified so far and
    /// invalidates every position (see [`LazyCache::on_data_reloaded`]); its new item count is
    /// read from `builder`.
    ///
    /// Nodes in [`Reconciliation::disposed`] are owned by the caller from here on.
    pub fn on_dataset_change<B, I>(&mut self, builder: &B, ops: I) -> Reconciliation<K, N>
    where
        B: ItemBuilder<K, N>,
        I: IntoIterator<Item = DatasetOperation<K>>,
    {
        self.reconcile(ops, || builder.total_count())
    }

    pub fn on_data_added(&mut self, index: usize) -> Reconciliation<K, N> {
        self.on_data_bulk_added(index, 1)
    }

    pub fn on_data_bulk_added(&mut self, index: usize, count: usize) -> Reconciliation<K, N> {
        self.single(DatasetOperation::add(index, count))
    }

    pub fn on_data_deleted(&mut self, index: usize) -> Reconciliation<K, N> {
        self.on_data_bulk_deleted(index, 1)
    }

    pub fn on_data_bulk_deleted(&mut self, index: usize, count: usize) -> Reconciliation<K, N> {
        self.single(DatasetOperation::delete(index, count))
    }

    pub fn on_data_changed(&mut self, index: usize) -> Reconciliation<K, N> {
        self.single(DatasetOperation::change(index))
    }

    pub fn on_data_moved(&mut self, from: usize, to: usize) -> Reconciliation<K, N> {
        self.single(DatasetOperation::move_item(from, to))
    }

    /// Invalidates every position.
    ///
    /// The active view is emptied and every realized node is kept as expiring with an unknown
    /// index, so rows whose key survives the reload are re-activated without a rebuild when the
    /// builder reports them again (see [`ItemBuilder::key_for`]).
    pub fn on_data_reloaded(&mut self, total_count: usize) -> Reconciliation<K, N> {
        self.reconcile(vec![DatasetOperation::reload()], || total_count)
    }

    fn single(&mut self, op: DatasetOperation<K>) -> Reconciliation<K, N> {
        let count = self.options.count;
        self.reconcile(vec![op], || count)
    }

    fn reconcile<I>(&mut self, ops: I, reload_count: impl FnOnce() -> usize) -> Reconciliation<K, N>
    where
        I: IntoIterator<Item = DatasetOperation<K>>,
    {
        let mut ctx = self.lift_context();
        let mut reload = false;

        for op in ops {
            match ctx.classify(op) {
                Classified::Accepted { first_index } => {
                    let first = ctx.first_affected.map_or(first_index, |f| f.min(first_index));
                    ctx.first_affected = Some(first);
                }
                Classified::NoOp => {}
                Classified::Rejected(err) => {
                    lwarn!(%err, "operation skipped");
                    ctx.rejected.push(err);
                }
                Classified::Reload => {
                    reload = true;
                    break;
                }
            }
        }

        if reload {
            return self.finish_reload(ctx, reload_count());
        }

        let shifts = ctx.shift_map();
        let delta = ctx.net_delta();
        let placements = ctx.replay(&shifts);

        let outside = self.disposed.len();
        for placement in placements {
            let (key, slot) = match placement {
                Placement::Active { index, key, node } => (key, Slot::Active { index, node }),
                Placement::Parked { index, key, node } => (key, Slot::Parked { index, node }),
                Placement::Expiring { index, key, node } => {
                    let stamp = self.stamp();
                    (
                        key,
                        Slot::Expiring {
                            last_index: index,
                            node,
                            stamp,
                        },
                    )
                }
            };
            self.insert_slot(key, slot);
        }
        ctx.disposed.extend(self.disposed.drain(outside..));

        let count = self.options.count.saturating_add_signed(delta);
        self.options.count = count;

        ldebug!(
            first_affected = ?ctx.first_affected,
            disposed = ctx.disposed.len(),
            rejected = ctx.rejected.len(),
            count,
            "dataset change reconciled"
        );

        Reconciliation {
            first_affected: ctx.first_affected,
            disposed: ctx.disposed,
            rejected: ctx.rejected,
            reloaded: false,
        }
    }

    fn finish_reload(
        &mut self,
        mut ctx: ReconciliationContext<K, N>,
        count: usize,
    ) -> Reconciliation<K, N> {
        let outside = self.disposed.len();
        for (key, mut node) in ctx.drain_for_reload() {
            node.set_active(false);
            let stamp = self.stamp();
            self.insert_slot(
                key,
                Slot::Expiring {
                    last_index: None,
                    node,
                    stamp,
                },
            );
        }
        ctx.disposed.extend(self.disposed.drain(outside..));
        self.options.count = count;

        ldebug!(
            count,
            retained = self.slots.len(),
            rejected = ctx.rejected.len(),
            "dataset reloaded"
        );

        let mut result = Reconciliation::empty();
        result.first_affected = Some(0);
        result.disposed = ctx.disposed;
        result.rejected = ctx.rejected;
        result.reloaded = true;
        result
    }

    /// Moves the whole store into a fresh context. The interrupted predictive build is
    /// abandoned: its index is meaningless after any dataset change.
    fn lift_context(&mut self) -> ReconciliationContext<K, N> {
        let mut ctx = ReconciliationContext::new(self.options.count);
        self.active.clear();

        let mut expiring: Vec<(u64, Option<usize>, K, N)> = Vec::new();
        for (key, slot) in mem::take(&mut self.slots) {
            match slot {
                Slot::Active { index, node } => ctx.insert_active(
                    index,
                    Entry {
                        key,
                        node,
                        parked: false,
                    },
                ),
                Slot::Parked { index, node } => ctx.insert_active(
                    index,
                    Entry {
                        key,
                        node: Some(node),
                        parked: true,
                    },
                ),
                Slot::Expiring {
                    last_index,
                    node,
                    stamp,
                } => expiring.push((stamp, last_index, key, node)),
            }
        }
        // Oldest first, so the freshest node keeps a contested index.
        expiring.sort_by_key(|(stamp, ..)| *stamp);
        for (_, index, key, node) in expiring {
            ctx.insert_expiring(index, key, node);
        }

        if let Some(interrupted) = self.interrupted.take() {
            ldebug!(index = interrupted.index, "abandoning interrupted predictive build");
            ctx.disposed.push((interrupted.key, interrupted.node));
        }
        ctx
    }
}
