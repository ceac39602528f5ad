use alloc::vec::Vec;

use crate::reconcile::{Entry, ReconciliationContext};
use crate::{CacheError, CacheKey, DatasetOperation, OperationKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IntentKind {
    Add,
    Delete,
    Change,
    MoveIn,
    MoveOut,
    Exchange,
}

/// Where a carried item lived before the batch. Relocation keeps it there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Residence {
    Active,
    Parked,
    Expiring,
}

/// An item lifted out of its original index by a move or exchange.
#[derive(Debug)]
pub(crate) struct Carried<K, N> {
    pub(crate) key: K,
    pub(crate) node: Option<N>,
    pub(crate) origin: Residence,
}

/// What one original index is asked to become.
#[derive(Debug)]
pub(crate) struct OperationIntent<K, N> {
    pub(crate) kind: IntentKind,
    pub(crate) net_count_delta: isize,
    /// Replacement key for a changed row.
    pub(crate) new_key: Option<K>,
    pub(crate) carried: Option<Carried<K, N>>,
    /// Keys reserved for the rows an add inserts.
    pub(crate) extra_keys: Vec<K>,
    /// `from - to` of the move this intent came from; negative for forward moves.
    pub(crate) from_diff_to: isize,
}

impl<K, N> OperationIntent<K, N> {
    pub(crate) fn new(kind: IntentKind, net_count_delta: isize) -> Self {
        Self {
            kind,
            net_count_delta,
            new_key: None,
            carried: None,
            extra_keys: Vec::new(),
            from_diff_to: 0,
        }
    }

    pub(crate) fn is_forward_move(&self) -> bool {
        self.kind == IntentKind::MoveIn && self.from_diff_to < 0
    }
}

/// Outcome of classifying one operation.
#[derive(Debug)]
pub(crate) enum Classified {
    /// Intents were recorded; the operation touched this original index first.
    Accepted { first_index: usize },
    /// Valid, but nothing to do (a move or exchange onto itself).
    NoOp,
    Rejected(CacheError),
    Reload,
}

fn to_delta(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}

fn signed_distance(from: usize, to: usize) -> isize {
    if from >= to {
        to_delta(from - to)
    } else {
        -to_delta(to - from)
    }
}

impl<K: CacheKey, N> ReconciliationContext<K, N> {
    /// Validates `op` against the pre-batch index space and records its intents.
    ///
    /// Nothing is recorded for a rejected operation.
    pub(crate) fn classify(&mut self, op: DatasetOperation<K>) -> Classified {
        let kind = op.kind;
        match kind {
            OperationKind::Reload => Classified::Reload,
            OperationKind::Add => self.classify_add(op),
            OperationKind::Delete => self.classify_delete(op),
            OperationKind::Change => self.classify_change(op),
            OperationKind::Move => self.classify_move(op),
            OperationKind::Exchange => self.classify_exchange(op),
        }
    }

    fn in_range(&self, kind: OperationKind, index: usize) -> Result<(), CacheError> {
        let count = self.total_count;
        let ok = match kind {
            OperationKind::Add => index <= count,
            _ => index < count,
        };
        if ok {
            Ok(())
        } else {
            Err(CacheError::OutOfRangeOperation { kind, index, count })
        }
    }

    fn unclaimed(&self, kind: OperationKind, index: usize) -> Result<(), CacheError> {
        if self.intents.contains_key(&index) {
            return Err(CacheError::DuplicateOperationTarget { kind, index });
        }
        Ok(())
    }

    fn classify_add(&mut self, op: DatasetOperation<K>) -> Classified {
        let (kind, index) = (op.kind, op.index);
        if op.count == 0 {
            return Classified::Rejected(CacheError::MalformedOperation {
                kind,
                reason: "count must be at least 1",
            });
        }
        if let Err(err) = self
            .in_range(kind, index)
            .and_then(|()| self.unclaimed(kind, index))
        {
            return Classified::Rejected(err);
        }

        let mut keys = if op.key_list.is_empty() {
            op.key.into_iter().collect::<Vec<_>>()
        } else {
            op.key_list
        };
        keys.truncate(op.count);

        let mut intent = OperationIntent::new(IntentKind::Add, to_delta(op.count));
        intent.extra_keys = keys;
        self.intents.insert(index, intent);
        Classified::Accepted { first_index: index }
    }

    fn classify_delete(&mut self, op: DatasetOperation<K>) -> Classified {
        let (kind, index) = (op.kind, op.index);
        if op.count == 0 {
            return Classified::Rejected(CacheError::MalformedOperation {
                kind,
                reason: "count must be at least 1",
            });
        }
        if let Err(err) = self.in_range(kind, index) {
            return Classified::Rejected(err);
        }
        let end = index.saturating_add(op.count).min(self.total_count);
        if let Some(taken) = (index..end).find(|i| self.intents.contains_key(i)) {
            return Classified::Rejected(CacheError::DuplicateOperationTarget {
                kind,
                index: taken,
            });
        }

        self.intents.insert(
            index,
            OperationIntent::new(IntentKind::Delete, -to_delta(end - index)),
        );
        for i in index + 1..end {
            self.intents.insert(i, OperationIntent::new(IntentKind::Delete, 0));
        }
        Classified::Accepted { first_index: index }
    }

    fn classify_change(&mut self, op: DatasetOperation<K>) -> Classified {
        let (kind, index) = (op.kind, op.index);
        if let Err(err) = self
            .in_range(kind, index)
            .and_then(|()| self.unclaimed(kind, index))
        {
            return Classified::Rejected(err);
        }

        let mut intent = OperationIntent::new(IntentKind::Change, 0);
        intent.new_key = op.key.or_else(|| self.key_at(index));
        self.intents.insert(index, intent);
        Classified::Accepted { first_index: index }
    }

    fn classify_move(&mut self, op: DatasetOperation<K>) -> Classified {
        let kind = op.kind;
        let Some((from, to)) = op.couple_index else {
            return Classified::Rejected(CacheError::MalformedOperation {
                kind,
                reason: "move requires coupleIndex",
            });
        };
        if let Err(err) = self
            .in_range(kind, from)
            .and_then(|()| self.in_range(kind, to))
        {
            return Classified::Rejected(err);
        }
        if from == to {
            ldebug!(index = from, "move onto itself ignored");
            return Classified::NoOp;
        }
        if let Err(err) = self
            .unclaimed(kind, from)
            .and_then(|()| self.unclaimed(kind, to))
        {
            return Classified::Rejected(err);
        }

        let mut carried = self.lift(from);
        if let Some(key) = op.key {
            rename(&mut carried, key);
        }

        self.intents
            .insert(from, OperationIntent::new(IntentKind::MoveOut, -1));
        let mut intent = OperationIntent::new(IntentKind::MoveIn, 1);
        intent.carried = carried;
        intent.from_diff_to = signed_distance(from, to);
        self.intents.insert(to, intent);
        Classified::Accepted {
            first_index: from.min(to),
        }
    }

    fn classify_exchange(&mut self, op: DatasetOperation<K>) -> Classified {
        let kind = op.kind;
        let Some((a, b)) = op.couple_index else {
            return Classified::Rejected(CacheError::MalformedOperation {
                kind,
                reason: "exchange requires coupleIndex",
            });
        };
        if let Err(err) = self
            .in_range(kind, a)
            .and_then(|()| self.in_range(kind, b))
        {
            return Classified::Rejected(err);
        }
        if a == b {
            ldebug!(index = a, "exchange with itself ignored");
            return Classified::NoOp;
        }
        if let Err(err) = self
            .unclaimed(kind, a)
            .and_then(|()| self.unclaimed(kind, b))
        {
            return Classified::Rejected(err);
        }

        let mut from_a = self.lift(a);
        let mut from_b = self.lift(b);
        if let Some((at_a, at_b)) = op.couple_key {
            rename(&mut from_b, at_a);
            rename(&mut from_a, at_b);
        }

        let mut intent_a = OperationIntent::new(IntentKind::Exchange, 0);
        intent_a.carried = from_b;
        let mut intent_b = OperationIntent::new(IntentKind::Exchange, 0);
        intent_b.carried = from_a;
        self.intents.insert(a, intent_a);
        self.intents.insert(b, intent_b);
        Classified::Accepted {
            first_index: a.min(b),
        }
    }

    /// The key currently held for an original index, from whichever side holds it.
    fn key_at(&self, index: usize) -> Option<K> {
        if let Some(entry) = self.active.get(&index) {
            return Some(entry.key.clone());
        }
        self.expiring.get(&index).map(|(key, _)| key.clone())
    }

    /// Removes the item at an original index so an intent can carry it.
    fn lift(&mut self, index: usize) -> Option<Carried<K, N>> {
        if let Some(Entry { key, node, parked }) = self.active.remove(&index) {
            let origin = if parked {
                Residence::Parked
            } else {
                Residence::Active
            };
            return Some(Carried { key, node, origin });
        }
        let (key, node) = self.expiring.remove(&index)?;
        Some(Carried {
            key,
            node: Some(node),
            origin: Residence::Expiring,
        })
    }
}

/// Renames a carried item. An unbuilt partner still reserves the new key.
fn rename<K, N>(carried: &mut Option<Carried<K, N>>, key: K) {
    match carried {
        Some(item) => item.key = key,
        None => {
            *carried = Some(Carried {
                key,
                node: None,
                origin: Residence::Active,
            });
        }
    }
}
