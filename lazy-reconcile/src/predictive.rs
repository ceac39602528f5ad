use alloc::vec::Vec;

use crate::store::Slot;
use crate::{CacheKey, Clock, ItemBuilder, ItemNode, LazyCache, PredictiveOutcome, PredictiveStatus};

/// A predictive build that ran out of time inside the node's incremental build.
#[derive(Debug)]
pub(crate) struct InterruptedBuild<K, N> {
    pub(crate) index: usize,
    pub(crate) key: K,
    pub(crate) node: N,
}

enum ItemOutcome {
    Committed,
    Discarded,
    Suspended(PredictiveStatus),
}

impl<N: ItemNode, K: CacheKey> LazyCache<N, K> {
    /// Indices around the active window that a predictive pass would build, nearest first.
    ///
    /// Indices that already own a node (or a reserved active slot) are skipped.
    pub fn idle_indices(&self) -> Vec<usize> {
        let Some(range) = self.active_range() else {
            return Vec::new();
        };
        let mut indices = range.cache_indices(self.options.count, self.options.predictive_extra);
        indices.retain(|index| !self.is_cached(*index));
        indices
    }

    /// Builds items around the active window until `deadline` (in `clock` units).
    ///
    /// An item left half-built by the previous pass is finished first. Every finished item is
    /// committed to the expiring cache, deactivated: nothing visible changes. The optional layout
    /// step runs only with a `constraint`, `can_run_long_task`, and time left.
    ///
    /// A pass that times out can simply be called again on a later frame.
    pub fn predictive_build<B, C>(
        &mut self,
        builder: &mut B,
        clock: &C,
        deadline: u64,
        constraint: Option<&N::Constraint>,
        can_run_long_task: bool,
    ) -> PredictiveOutcome
    where
        B: ItemBuilder<K, N>,
        C: Clock + ?Sized,
    {
        let mut outcome = PredictiveOutcome {
            built: 0,
            reused: 0,
            misses: 0,
            status: PredictiveStatus::Done,
        };

        if let Some(InterruptedBuild { index, key, node }) = self.interrupted.take() {
            ltrace!(index, "predictive_build: resuming interrupted item");
            match self.finish_item(
                index,
                key,
                node,
                clock,
                deadline,
                constraint,
                can_run_long_task,
            ) {
                ItemOutcome::Committed => outcome.built += 1,
                ItemOutcome::Discarded => {}
                ItemOutcome::Suspended(status) => {
                    outcome.status = status;
                    return outcome;
                }
            }
        }

        for index in self.idle_indices() {
            if clock.now() >= deadline {
                outcome.status = PredictiveStatus::TimedOut { resume_at: None };
                ltrace!(built = outcome.built, "predictive_build: deadline reached");
                return outcome;
            }
            // A retained node whose position was lost (reload) is re-pinned instead of rebuilt.
            if let Some(key) = builder.key_for(index) {
                match self.slots.get_mut(&key) {
                    Some(Slot::Expiring { last_index, .. }) => {
                        *last_index = Some(index);
                        outcome.reused += 1;
                        continue;
                    }
                    Some(_) => {
                        ltrace!(index, "predictive_build: key is realized elsewhere");
                        continue;
                    }
                    None => {}
                }
            }
            let Some((key, node)) = builder.build(index) else {
                lwarn!("predictive_build: {}", crate::CacheError::BuilderMiss { index });
                outcome.misses += 1;
                continue;
            };
            match self.finish_item(
                index,
                key,
                node,
                clock,
                deadline,
                constraint,
                can_run_long_task,
            ) {
                ItemOutcome::Committed => outcome.built += 1,
                ItemOutcome::Discarded => {}
                ItemOutcome::Suspended(status) => {
                    outcome.status = status;
                    return outcome;
                }
            }
        }

        ltrace!(
            built = outcome.built,
            reused = outcome.reused,
            misses = outcome.misses,
            "predictive_build: done"
        );
        outcome
    }

    /// Takes the interrupted predictive build for `index` and finishes it without a deadline.
    /// A node that still cannot finish is disposed.
    pub(crate) fn resume_interrupted(&mut self, index: usize) -> Option<(K, N)> {
        if self.interrupted.as_ref().is_none_or(|i| i.index != index) {
            return None;
        }
        let InterruptedBuild { key, mut node, .. } = self.interrupted.take()?;
        if node.render_incremental(u64::MAX) {
            ltrace!(index, "resume_interrupted: finished suspended build");
            return Some((key, node));
        }
        self.disposed.push((key, node));
        None
    }

    /// Runs the incremental build and commits the node as expiring.
    ///
    /// A node whose key or index became visible in the meantime is discarded: the live node
    /// always wins.
    #[allow(clippy::too_many_arguments)]
    fn finish_item<C: Clock + ?Sized>(
        &mut self,
        index: usize,
        key: K,
        mut node: N,
        clock: &C,
        deadline: u64,
        constraint: Option<&N::Constraint>,
        can_run_long_task: bool,
    ) -> ItemOutcome {
        let mapped = self.slots.get(&key).and_then(Slot::mapped_index).is_some();
        if mapped || self.active.contains_key(&index) {
            ldebug!(index, "predictive_build: discarding node shadowed by a live item");
            self.disposed.push((key, node));
            return ItemOutcome::Discarded;
        }

        if !node.render_incremental(deadline) {
            ldebug!(index, "predictive_build: item suspended");
            self.interrupted = Some(InterruptedBuild { index, key, node });
            return ItemOutcome::Suspended(PredictiveStatus::TimedOut {
                resume_at: Some(index),
            });
        }

        if let Some(constraint) = constraint {
            if can_run_long_task && clock.now() < deadline {
                node.finalize_layout_if_needed(constraint);
            }
        }

        node.set_active(false);
        let stamp = self.stamp();
        self.insert_slot(
            key,
            Slot::Expiring {
                last_index: Some(index),
                node,
                stamp,
            },
        );
        ItemOutcome::Committed
    }

    fn is_cached(&self, index: usize) -> bool {
        if self.active.contains_key(&index) {
            return true;
        }
        self.slots.values().any(|slot| {
            matches!(
                slot,
                Slot::Expiring {
                    last_index: Some(i),
                    ..
                } if *i == index
            )
        })
    }
}
