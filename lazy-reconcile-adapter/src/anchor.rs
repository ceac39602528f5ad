use core::fmt;

use lazy_reconcile::{CacheKey, ItemNode, LazyCache};

/// An item identity captured before a dataset change, used to keep the viewport on the same
/// item afterwards.
///
/// Typical use cases:
/// - chat/timeline "prepend" (load older messages above) without content jumping
/// - any reorder/replace where the window should follow an item rather than an index
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemAnchor<K> {
    pub key: K,
    /// The anchored item's index when it was captured.
    pub index: usize,
    /// Distance from the window start to the anchored item.
    pub offset_in_window: usize,
}

impl<K: fmt::Debug> fmt::Debug for ItemAnchor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemAnchor")
            .field("key", &self.key)
            .field("index", &self.index)
            .field("offset_in_window", &self.offset_in_window)
            .finish()
    }
}

/// Captures an anchor for the first realized item of the active window.
///
/// Returns `None` if no window is set or nothing in it is realized yet.
pub fn capture_first_active_anchor<N: ItemNode, K: CacheKey>(
    cache: &LazyCache<N, K>,
) -> Option<ItemAnchor<K>> {
    let range = cache.active_range()?;
    let mut found = None;
    let mut offset = 0usize;
    range.for_each_index(cache.count(), |index| {
        if found.is_none() {
            if cache.node(index).is_some() {
                found = Some(index);
            } else {
                offset += 1;
            }
        }
    });
    let index = found?;
    let key = cache.key_at(index)?.clone();
    Some(ItemAnchor {
        key,
        index,
        offset_in_window: offset,
    })
}

/// Looks up the anchored key's current index.
///
/// The cache is asked first. A key the cache no longer places (after a reload, or if it was
/// evicted) falls back to `key_to_index`, which must describe the *current* dataset.
pub fn resolve_anchor<N: ItemNode, K: CacheKey>(
    cache: &LazyCache<N, K>,
    anchor: &ItemAnchor<K>,
    mut key_to_index: impl FnMut(&K) -> Option<usize>,
) -> Option<usize> {
    cache
        .position_of(&anchor.key)
        .and_then(|pos| pos.index())
        .or_else(|| key_to_index(&anchor.key))
}
