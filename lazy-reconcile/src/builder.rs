/// Produces realized nodes for data indices.
///
/// The builder is owned by the caller and passed into every call that may need to build, so the
/// cache never holds a reference to the dataset.
///
/// Contract:
/// - `build(i)` must be deterministic for a given dataset state and index.
/// - The returned key must identify the logical record, not its position: the same record keeps
///   the same key when its index changes.
/// - Returning `None` means "nothing to cache yet"; the cache retries on a later call.
pub trait ItemBuilder<K, N> {
    /// Number of items in the current dataset.
    fn total_count(&self) -> usize;

    fn build(&mut self, index: usize) -> Option<(K, N)>;

    /// Cheap key lookup without building a node.
    ///
    /// When implemented, the cache can re-activate a node retained in the expiring cache for an
    /// index it has no active mapping for, instead of rebuilding it.
    fn key_for(&self, index: usize) -> Option<K> {
        let _ = index;
        None
    }
}

impl<K, N, F> ItemBuilder<K, N> for (usize, F)
where
    F: FnMut(usize) -> Option<(K, N)>,
{
    fn total_count(&self) -> usize {
        self.0
    }

    fn build(&mut self, index: usize) -> Option<(K, N)> {
        (self.1)(index)
    }
}

/// Operations the cache performs on a realized node.
pub trait ItemNode {
    /// Layout hint passed to [`ItemNode::finalize_layout_if_needed`].
    type Constraint;

    /// Toggles visual activity. Called when a node enters or leaves the active window.
    fn set_active(&mut self, active: bool);

    /// Continues building the node until it is finished or `deadline` is reached.
    ///
    /// Returns `true` once the node is fully built. This is the only place an item build may be
    /// suspended and resumed.
    fn render_incremental(&mut self, deadline: u64) -> bool;

    /// Optional heavier pre-measurement step used by predictive builds.
    fn finalize_layout_if_needed(&mut self, constraint: &Self::Constraint);
}

/// Time source for deadline-bound work.
///
/// Deadlines passed to the cache use the same unit as `now()`.
pub trait Clock {
    fn now(&self) -> u64;
}

impl<F: Fn() -> u64> Clock for F {
    fn now(&self) -> u64 {
        self()
    }
}

/// A monotonic clock reporting microseconds since it was created.
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        let micros = self.origin.elapsed().as_micros();
        u64::try_from(micros).unwrap_or(u64::MAX)
    }
}
