/// Configuration for [`crate::LazyCache`].
///
/// With `feature = "serde"`, this type implements `Serialize`/`Deserialize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheOptions {
    /// Number of items in the dataset when the cache is created.
    ///
    /// After that, the cache advances it by the net size change of every reconciled batch and
    /// re-reads it from the item builder on reload.
    pub count: usize,

    /// Items after the active window that are kept built (and predictively built).
    pub cache_ahead: usize,
    /// Items before the active window that are kept built (and predictively built).
    pub cache_behind: usize,

    /// Extra indices beyond the cache window considered by predictive builds.
    pub predictive_extra: usize,

    /// Whether the list wraps around: index `count - 1` is followed by index 0.
    pub is_circular: bool,

    /// Upper bound on nodes retained outside the active window.
    ///
    /// `None` keeps every retained node until it is re-activated, reconciled away, or cleared.
    /// When set, the oldest retained nodes are moved to the disposal list on compaction.
    pub expiring_capacity: Option<usize>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CacheOptions {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            cache_ahead: 1,
            cache_behind: 1,
            predictive_extra: 0,
            is_circular: false,
            expiring_capacity: None,
        }
    }

    /// Sets both cache directions at once.
    pub fn with_cache_count(mut self, cache_count: usize) -> Self {
        self.cache_ahead = cache_count;
        self.cache_behind = cache_count;
        self
    }

    pub fn with_cache_ahead(mut self, cache_ahead: usize) -> Self {
        self.cache_ahead = cache_ahead;
        self
    }

    pub fn with_cache_behind(mut self, cache_behind: usize) -> Self {
        self.cache_behind = cache_behind;
        self
    }

    pub fn with_predictive_extra(mut self, predictive_extra: usize) -> Self {
        self.predictive_extra = predictive_extra;
        self
    }

    pub fn with_circular(mut self, is_circular: bool) -> Self {
        self.is_circular = is_circular;
        self
    }

    pub fn with_expiring_capacity(mut self, expiring_capacity: Option<usize>) -> Self {
        self.expiring_capacity = expiring_capacity;
        self
    }
}
