use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::store::Slot;
use crate::{CacheKey, ItemNode, LazyCache};

/// The window of indices that must be realized, plus the cache margins around it.
///
/// `start > end` is only meaningful for circular lists, where it denotes a window that wraps
/// past the last index back to 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActiveRange {
    pub start: usize,
    /// Inclusive.
    pub end: usize,
    pub cache_ahead: usize,
    pub cache_behind: usize,
    pub is_circular: bool,
}

impl ActiveRange {
    /// Whether `index` is inside the window for a dataset of `count` items.
    pub fn contains(&self, index: usize, count: usize) -> bool {
        if index >= count {
            return false;
        }
        if self.start <= self.end {
            return self.start <= index && index <= self.end;
        }
        self.is_circular && (index >= self.start || index <= self.end)
    }

    /// Calls `f` for every index inside the window, in window order.
    pub fn for_each_index(&self, count: usize, mut f: impl FnMut(usize)) {
        if count == 0 {
            return;
        }
        if self.start <= self.end {
            if self.start >= count {
                return;
            }
            for i in self.start..=self.end.min(count - 1) {
                f(i);
            }
            return;
        }
        if !self.is_circular {
            return;
        }
        for i in self.start..count {
            f(i);
        }
        for i in 0..=self.end.min(count - 1) {
            f(i);
        }
    }

    /// Indices outside the window that should be built ahead of time, nearest first, ahead of
    /// the window before behind it.
    ///
    /// `extra` widens both margins. Non-circular lists drop indices outside `[0, count)`;
    /// circular lists wrap them and skip indices that fall back inside the window.
    pub fn cache_indices(&self, count: usize, extra: usize) -> Vec<usize> {
        let mut out = Vec::new();
        if count == 0 {
            return out;
        }
        let ahead = self.cache_ahead.saturating_add(extra);
        let behind = self.cache_behind.saturating_add(extra);

        let push = |index: usize, out: &mut Vec<usize>| {
            if !self.contains(index, count) && !out.contains(&index) {
                out.push(index);
            }
        };

        for i in 1..=ahead {
            if self.is_circular {
                push((self.end % count + i % count) % count, &mut out);
            } else {
                match self.end.checked_add(i) {
                    Some(index) if index < count => push(index, &mut out),
                    _ => break,
                }
            }
        }
        for i in 1..=behind {
            if self.is_circular {
                push((self.start % count + count - i % count) % count, &mut out);
            } else {
                match self.start.checked_sub(i) {
                    Some(index) if index < count => push(index, &mut out),
                    Some(_) => continue,
                    None => break,
                }
            }
        }
        out
    }
}

impl<N: ItemNode, K: CacheKey> LazyCache<N, K> {
    /// The current window, if one has been set.
    pub fn active_range(&self) -> Option<ActiveRange> {
        let (start, end) = self.window?;
        Some(ActiveRange {
            start,
            end,
            cache_ahead: self.options.cache_ahead,
            cache_behind: self.options.cache_behind,
            is_circular: self.options.is_circular,
        })
    }

    /// Moves the active window to `[start, end]` (inclusive; `start > end` wraps on circular
    /// lists).
    ///
    /// Realized items leaving the window are deactivated and parked: their index stays reserved
    /// until the next [`LazyCache::compact`]. Parked items re-entering the window are promoted
    /// back without a rebuild, and so are expiring items whose last index is now in the window
    /// and unmapped. Items retained without a known index need a builder key lookup: see
    /// [`LazyCache::get_or_build`].
    ///
    /// Returns `true` when any item changed activity or when an index inside the window still
    /// needs a build (see [`LazyCache::missing_in_range`]).
    pub fn set_active_range(&mut self, start: usize, end: usize) -> bool {
        self.window = Some((start, end));
        let Some(range) = self.active_range() else {
            return false;
        };
        let count = self.options.count;
        ltrace!(start, end, count, "set_active_range");

        let mut changed = false;
        for (&index, key) in self.active.iter() {
            let Some(slot) = self.slots.get_mut(key) else {
                continue;
            };
            if range.contains(index, count) {
                changed |= slot.promote();
            } else {
                changed |= slot.park();
            }
        }

        // Newest retained node per unmapped in-window index.
        let mut returning: BTreeMap<usize, (u64, K)> = BTreeMap::new();
        for (key, slot) in self.slots.iter() {
            let Slot::Expiring {
                last_index: Some(index),
                stamp,
                ..
            } = slot
            else {
                continue;
            };
            let index = *index;
            if index >= count || !range.contains(index, count) || self.active.contains_key(&index) {
                continue;
            }
            if returning.get(&index).is_none_or(|(s, _)| *s < *stamp) {
                returning.insert(index, (*stamp, key.clone()));
            }
        }
        for (index, (_, key)) in returning {
            self.activate_expiring(&key, index);
            changed = true;
        }

        let missing = self.missing_in_range();
        if !missing.is_empty() {
            ldebug!(missing = missing.len(), "set_active_range: items need build");
            changed = true;
        }
        changed
    }

    /// Indices inside the active window without a realized, active node.
    pub fn missing_in_range(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(range) = self.active_range() else {
            return out;
        };
        range.for_each_index(self.options.count, |index| {
            let live = self
                .active
                .get(&index)
                .and_then(|key| self.slots.get(key))
                .is_some_and(|slot| matches!(slot, Slot::Active { node: Some(_), .. }));
            if !live {
                out.push(index);
            }
        });
        out
    }
}
