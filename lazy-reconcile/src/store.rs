use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::mem;

use crate::key::KeyMap;
use crate::predictive::InterruptedBuild;
use crate::{CacheKey, CacheOptions, CachedItem, ItemBuilder, ItemNode, SlotPosition};

/// Where a key's node lives. Every key owns exactly one slot, and every realized node is owned
/// by exactly one slot.
#[derive(Debug)]
pub(crate) enum Slot<N> {
    /// Inside the active window. `None` means the node has to be (re)built.
    Active { index: usize, node: Option<N> },
    /// Left the active window. The index stays mapped until the next compaction.
    Parked { index: usize, node: N },
    /// Retained off-screen, keyed only by its key.
    Expiring {
        last_index: Option<usize>,
        node: N,
        stamp: u64,
    },
}

impl<N> Slot<N> {
    /// The index this slot occupies in the active view.
    pub(crate) fn mapped_index(&self) -> Option<usize> {
        match self {
            Self::Active { index, .. } | Self::Parked { index, .. } => Some(*index),
            Self::Expiring { .. } => None,
        }
    }

    pub(crate) fn position(&self) -> SlotPosition {
        match self {
            Self::Active {
                index,
                node: Some(_),
            } => SlotPosition::Active(*index),
            Self::Active { index, node: None } => SlotPosition::Pending(*index),
            Self::Parked { index, .. } => SlotPosition::Parked(*index),
            Self::Expiring { last_index, .. } => SlotPosition::Expiring(*last_index),
        }
    }

    pub(crate) fn into_node(self) -> Option<N> {
        match self {
            Self::Active { node, .. } => node,
            Self::Parked { node, .. } | Self::Expiring { node, .. } => Some(node),
        }
    }
}

impl<N: ItemNode> Slot<N> {
    /// Parks a live active node. Returns `true` if the node changed state.
    pub(crate) fn park(&mut self) -> bool {
        let Self::Active { index, node } = self else {
            return false;
        };
        let index = *index;
        let Some(mut node) = node.take() else {
            return false;
        };
        node.set_active(false);
        *self = Self::Parked { index, node };
        true
    }

    /// Re-activates a parked node in place. Returns `true` if the node changed state.
    pub(crate) fn promote(&mut self) -> bool {
        if !matches!(self, Self::Parked { .. }) {
            return false;
        }
        let Self::Parked { index, mut node } = mem::replace(
            self,
            Self::Active {
                index: 0,
                node: None,
            },
        ) else {
            return false;
        };
        node.set_active(true);
        *self = Self::Active {
            index,
            node: Some(node),
        };
        true
    }
}

/// A cache of lazily built list items.
///
/// The cache is UI-agnostic: nodes are opaque values produced by an [`ItemBuilder`], and the
/// cache only decides which of them must exist and where they live:
///
/// - **active**: inside the window set by [`LazyCache::set_active_range`]
/// - **expiring**: built but off-screen, kept for cheap re-activation
/// - **disposed**: handed back to the caller for teardown
///
/// Nodes are moved, never cloned, so a node can only ever be in one place.
///
/// The cache does not hold the builder. Calls that may build take it as an argument.
#[derive(Debug)]
pub struct LazyCache<N, K = String> {
    pub(crate) options: CacheOptions,
    pub(crate) window: Option<(usize, usize)>,

    pub(crate) slots: KeyMap<K, Slot<N>>,
    // Derived index -> key view of the Active/Parked slots.
    pub(crate) active: BTreeMap<usize, K>,

    pub(crate) disposed: Vec<(K, N)>,
    pub(crate) interrupted: Option<InterruptedBuild<K, N>>,
    pub(crate) next_stamp: u64,
}

impl<N: ItemNode, K: CacheKey> LazyCache<N, K> {
    pub fn new(options: CacheOptions) -> Self {
        ldebug!(
            count = options.count,
            cache_ahead = options.cache_ahead,
            cache_behind = options.cache_behind,
            circular = options.is_circular,
            "LazyCache::new"
        );
        Self {
            options,
            window: None,
            slots: KeyMap::<K, Slot<N>>::new(),
            active: BTreeMap::new(),
            disposed: Vec::new(),
            interrupted: None,
            next_stamp: 0,
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Replaces the options. Retained nodes are kept; a smaller `expiring_capacity` applies on
    /// the next compaction.
    pub fn set_options(&mut self, options: CacheOptions) {
        self.options = options;
        ltrace!(
            count = self.options.count,
            cache_ahead = self.options.cache_ahead,
            cache_behind = self.options.cache_behind,
            "LazyCache::set_options"
        );
    }

    /// Clones the current options, applies `f`, then delegates to `set_options`.
    pub fn update_options(&mut self, f: impl FnOnce(&mut CacheOptions)) {
        let mut next = self.options;
        f(&mut next);
        self.set_options(next);
    }

    /// Number of items in the dataset, as tracked across reconciliations.
    pub fn count(&self) -> usize {
        self.options.count
    }

    pub fn set_count(&mut self, count: usize) {
        self.options.count = count;
    }

    /// Number of indices in the active view (live, pending, or parked).
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of realized nodes retained outside the active window (parked or expiring).
    pub fn expiring_len(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Parked { .. } | Slot::Expiring { .. }))
            .count()
    }

    pub fn position_of(&self, key: &K) -> Option<SlotPosition> {
        self.slots.get(key).map(Slot::position)
    }

    pub fn key_at(&self, index: usize) -> Option<&K> {
        self.active.get(&index)
    }

    /// The live node at `index`, if it is active and built.
    pub fn node(&self, index: usize) -> Option<&N> {
        let key = self.active.get(&index)?;
        match self.slots.get(key)? {
            Slot::Active { node, .. } => node.as_ref(),
            _ => None,
        }
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut N> {
        let key = self.active.get(&index)?;
        match self.slots.get_mut(key)? {
            Slot::Active { node, .. } => node.as_mut(),
            _ => None,
        }
    }

    /// Iterates over the active view in index order. The node is `None` for pending and parked
    /// indices.
    pub fn for_each_active(&self, mut f: impl FnMut(usize, &K, Option<&N>)) {
        for (&index, key) in self.active.iter() {
            let node = match self.slots.get(key) {
                Some(Slot::Active { node, .. }) => node.as_ref(),
                _ => None,
            };
            f(index, key, node);
        }
    }

    /// Returns the node for `index`, re-activating or building it as needed.
    ///
    /// Lookup order:
    /// 1. a live active node is returned unchanged;
    /// 2. a parked or expiring node for the index's key is promoted back (no rebuild);
    /// 3. if `need_build` is false, returns `None`;
    /// 4. a predictive build suspended at this index is finished and used;
    /// 5. otherwise the builder is invoked. With `as_prebuild`, the new node is parked instead
    ///    of activated and the returned node is `None` (placeholder).
    ///
    /// A builder miss returns `None` and leaves the cache untouched.
    pub fn get_or_build<B: ItemBuilder<K, N>>(
        &mut self,
        builder: &mut B,
        index: usize,
        need_build: bool,
        as_prebuild: bool,
    ) -> Option<(K, Option<&mut N>)> {
        if let Some(key) = self.active.get(&index).cloned() {
            match self.slots.get(&key).map(Slot::position) {
                Some(SlotPosition::Active(_)) => return self.view(key),
                Some(SlotPosition::Parked(_)) => {
                    if let Some(slot) = self.slots.get_mut(&key) {
                        slot.promote();
                    }
                    ltrace!(index, "get_or_build: promoted parked node");
                    return self.view(key);
                }
                Some(SlotPosition::Pending(_)) => {}
                _ => {
                    self.active.remove(&index);
                }
            }
        } else if let Some(key) = self.expiring_key_for(builder, index) {
            self.activate_expiring(&key, index);
            ltrace!(index, "get_or_build: re-activated expiring node");
            return self.view(key);
        }

        if !need_build {
            return None;
        }

        let (key, mut node) = match self.resume_interrupted(index) {
            Some(resumed) => resumed,
            None => {
                let Some(built) = builder.build(index) else {
                    lwarn!("get_or_build: {}", crate::CacheError::BuilderMiss { index });
                    return None;
                };
                built
            }
        };

        node.set_active(!as_prebuild);
        if as_prebuild {
            self.insert_slot(key.clone(), Slot::Parked { index, node });
        } else {
            self.insert_slot(
                key.clone(),
                Slot::Active {
                    index,
                    node: Some(node),
                },
            );
        }
        self.view(key)
    }

    /// Removes the active mapping for `index`. A realized node for its key moves to the
    /// disposal list.
    pub fn drop_index(&mut self, index: usize) {
        let Some(key) = self.active.remove(&index) else {
            return;
        };
        if let Some(node) = self.slots.remove(&key).and_then(Slot::into_node) {
            ltrace!(index, "drop_index: disposing node");
            self.disposed.push((key, node));
        }
    }

    /// Drains the nodes removed outside of reconciliation (replaced keys, capacity evictions,
    /// [`LazyCache::clear`]).
    pub fn take_disposed(&mut self) -> Vec<(K, N)> {
        mem::take(&mut self.disposed)
    }

    /// Finalizes the active view after a layout pass and returns the live items in index order.
    ///
    /// - parked items leave the active view and become expiring (keeping their last index);
    /// - pending indices outside the window are forgotten;
    /// - the window is re-derived from the live indices. On circular lists, the first gap in the
    ///   live indices marks the wrap point (live `{1, 3, 5}` gives start 3, end 1).
    pub fn compact(&mut self) -> Vec<CachedItem<K>> {
        let range = self.active_range();
        let count = self.options.count;
        let mut items = Vec::new();
        let mut retire = Vec::new();

        for (&index, key) in self.active.iter() {
            match self.slots.get(key) {
                Some(Slot::Active { node: Some(_), .. }) => items.push(CachedItem {
                    index,
                    key: key.clone(),
                }),
                Some(Slot::Active { node: None, .. }) => {
                    if !range.is_some_and(|r| r.contains(index, count)) {
                        retire.push(index);
                    }
                }
                _ => retire.push(index),
            }
        }

        for index in retire {
            let Some(key) = self.active.remove(&index) else {
                continue;
            };
            let stamp = self.stamp();
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            match mem::replace(
                slot,
                Slot::Active {
                    index,
                    node: None,
                },
            ) {
                Slot::Parked { node, .. } => {
                    *slot = Slot::Expiring {
                        last_index: Some(index),
                        node,
                        stamp,
                    };
                }
                other => {
                    self.slots.remove(&key);
                    if let Some(node) = other.into_node() {
                        self.disposed.push((key, node));
                    }
                }
            }
        }

        self.derive_window(&items);
        self.enforce_expiring_capacity();
        ltrace!(live = items.len(), "compact");
        items
    }

    /// Moves every realized active node to the expiring cache, keeping its index.
    pub fn demote_all(&mut self) {
        let active = mem::take(&mut self.active);
        for (index, key) in active {
            let stamp = self.stamp();
            let Some(slot) = self.slots.remove(&key) else {
                continue;
            };
            if let Some(mut node) = slot.into_node() {
                node.set_active(false);
                self.slots.insert(
                    key,
                    Slot::Expiring {
                        last_index: Some(index),
                        node,
                        stamp,
                    },
                );
            }
        }
        ldebug!(retained = self.slots.len(), "demote_all");
    }

    /// Moves every node (active, retained, or mid-build) to the disposal list.
    pub fn clear(&mut self) {
        self.active.clear();
        for (key, slot) in mem::take(&mut self.slots) {
            if let Some(node) = slot.into_node() {
                self.disposed.push((key, node));
            }
        }
        if let Some(interrupted) = self.interrupted.take() {
            self.disposed.push((interrupted.key, interrupted.node));
        }
        ldebug!(disposed = self.disposed.len(), "clear");
    }

    /// Toggles activity on every live active node.
    pub fn set_all_active(&mut self, active: bool) {
        for slot in self.slots.values_mut() {
            if let Slot::Active {
                node: Some(node), ..
            } = slot
            {
                node.set_active(active);
            }
        }
    }

    pub(crate) fn stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1);
        stamp
    }

    fn view(&mut self, key: K) -> Option<(K, Option<&mut N>)> {
        let node = match self.slots.get_mut(&key)? {
            Slot::Active { node, .. } => node.as_mut(),
            Slot::Parked { .. } | Slot::Expiring { .. } => None,
        };
        Some((key, node))
    }

    /// Finds a retained node for an index without an active mapping: by the builder's key
    /// lookup first, then by remembered position.
    fn expiring_key_for<B: ItemBuilder<K, N>>(&self, builder: &B, index: usize) -> Option<K> {
        if let Some(key) = builder.key_for(index) {
            if matches!(self.slots.get(&key), Some(Slot::Expiring { .. })) {
                return Some(key);
            }
            return None;
        }
        self.slots.iter().find_map(|(key, slot)| match slot {
            Slot::Expiring {
                last_index: Some(i),
                ..
            } if *i == index => Some(key.clone()),
            _ => None,
        })
    }

    pub(crate) fn activate_expiring(&mut self, key: &K, index: usize) {
        let Some(Slot::Expiring { mut node, .. }) = self.slots.remove(key) else {
            return;
        };
        node.set_active(true);
        self.insert_slot(
            key.clone(),
            Slot::Active {
                index,
                node: Some(node),
            },
        );
    }

    /// Installs `slot` for `key`, keeping the active view consistent.
    ///
    /// A previous slot of the same key is replaced and its node disposed. A different key
    /// occupying the same index loses its mapping: its node is retained as expiring.
    pub(crate) fn insert_slot(&mut self, key: K, slot: Slot<N>) {
        if let Some(index) = slot.mapped_index() {
            self.evict_index(index, &key);
            self.active.insert(index, key.clone());
        }
        if let Some(prev) = self.slots.insert(key.clone(), slot) {
            let prev_index = prev.mapped_index();
            if let Some(i) = prev_index {
                if self.slots.get(&key).and_then(Slot::mapped_index) != Some(i) {
                    self.active.remove(&i);
                }
            }
            if let Some(node) = prev.into_node() {
                ldebug!(?prev_index, "insert_slot: replacing node of an existing key");
                self.disposed.push((key, node));
            }
        }
    }

    fn evict_index(&mut self, index: usize, incoming: &K) {
        let Some(occupant) = self.active.get(&index).cloned() else {
            return;
        };
        if &occupant == incoming {
            return;
        }
        self.active.remove(&index);
        let stamp = self.stamp();
        let Some(slot) = self.slots.remove(&occupant) else {
            return;
        };
        if let Some(mut node) = slot.into_node() {
            node.set_active(false);
            self.slots.insert(
                occupant,
                Slot::Expiring {
                    last_index: Some(index),
                    node,
                    stamp,
                },
            );
        }
    }

    fn derive_window(&mut self, items: &[CachedItem<K>]) {
        let (Some(first), Some(last)) = (items.first(), items.last()) else {
            return;
        };
        let mut start = first.index;
        let mut end = last.index;
        if self.options.is_circular {
            if let Some(pair) = items.windows(2).find(|w| w[1].index - w[0].index > 1) {
                start = pair[1].index;
                end = pair[0].index;
            }
        }
        self.window = Some((start, end));
    }

    pub(crate) fn enforce_expiring_capacity(&mut self) {
        let Some(capacity) = self.options.expiring_capacity else {
            return;
        };
        let mut expiring: Vec<(u64, K)> = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Expiring { stamp, .. } => Some((*stamp, key.clone())),
                _ => None,
            })
            .collect();
        if expiring.len() <= capacity {
            return;
        }
        expiring.sort_by_key(|(stamp, _)| *stamp);
        let excess = expiring.len() - capacity;
        for (_, key) in expiring.into_iter().take(excess) {
            if let Some(node) = self.slots.remove(&key).and_then(Slot::into_node) {
                self.disposed.push((key, node));
            }
        }
        ldebug!(evicted = excess, capacity, "expiring capacity reached");
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (index, key) in self.active.iter() {
            let slot = self.slots.get(key).expect("active view points at a missing slot");
            assert_eq!(slot.mapped_index(), Some(*index), "active view out of sync");
        }
        for slot in self.slots.values() {
            if let Some(index) = slot.mapped_index() {
                assert!(self.active.contains_key(&index), "mapped slot missing from view");
            }
        }
    }
}
