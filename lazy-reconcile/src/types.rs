use alloc::vec::Vec;

use crate::CacheError;

/// Where a key currently lives in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlotPosition {
    /// Realized and inside the active window.
    Active(usize),
    /// The index is reserved but the node must be (re)built.
    Pending(usize),
    /// Realized, outside the active window, index still reserved until the next compaction.
    Parked(usize),
    /// Realized and retained off-screen. `None` means the position is unknown (after a reload).
    Expiring(Option<usize>),
}

impl SlotPosition {
    /// The index the key occupies (or last occupied).
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Active(i) | Self::Pending(i) | Self::Parked(i) => Some(i),
            Self::Expiring(i) => i,
        }
    }

    pub fn has_node(self) -> bool {
        !matches!(self, Self::Pending(_))
    }
}

/// A realized item reported by [`crate::LazyCache::compact`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CachedItem<K> {
    pub index: usize,
    pub key: K,
}

/// Result of applying one batch of dataset operations.
#[derive(Debug)]
pub struct Reconciliation<K, N> {
    /// Smallest pre-batch index touched by an accepted operation (`Some(0)` on reload, `None`
    /// when every operation was rejected). Layout before this index is unaffected.
    pub first_affected: Option<usize>,
    /// Nodes removed by the batch. The caller owns their teardown.
    pub disposed: Vec<(K, N)>,
    /// Operations that were skipped.
    pub rejected: Vec<CacheError>,
    /// Whether the batch contained a reload.
    pub reloaded: bool,
}

impl<K, N> Reconciliation<K, N> {
    pub(crate) fn empty() -> Self {
        Self {
            first_affected: None,
            disposed: Vec::new(),
            rejected: Vec::new(),
            reloaded: false,
        }
    }
}

/// Result of one predictive pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredictiveOutcome {
    /// Nodes committed to the expiring cache during this pass.
    pub built: usize,
    /// Retained nodes re-pinned to an idle index instead of being rebuilt.
    pub reused: usize,
    /// Indices the item builder returned nothing for.
    pub misses: usize,
    pub status: PredictiveStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictiveStatus {
    /// Every idle index was processed before the deadline.
    Done,
    /// The deadline was reached. `resume_at` is set when an item was interrupted mid-build; the
    /// next pass resumes it before anything else.
    TimedOut { resume_at: Option<usize> },
}

impl PredictiveOutcome {
    pub fn is_done(&self) -> bool {
        self.status == PredictiveStatus::Done
    }
}
