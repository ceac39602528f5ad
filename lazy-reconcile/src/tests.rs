use crate::*;
use crate::reconcile::ReconciliationContext;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;

use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        // Deterministic, dependency-free PRNG for tests.
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0
    }

    fn gen_range_usize(&mut self, start: usize, end_exclusive: usize) -> usize {
        debug_assert!(start < end_exclusive);
        let span = (end_exclusive - start) as u64;
        start + (self.next_u64() % span) as usize
    }
}

#[derive(Debug)]
struct TestNode {
    id: u64,
    active: bool,
    steps_left: u32,
    finalized: u32,
}

impl ItemNode for TestNode {
    type Constraint = u32;

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn render_incremental(&mut self, _deadline: u64) -> bool {
        self.steps_left = self.steps_left.saturating_sub(1);
        self.steps_left == 0
    }

    fn finalize_layout_if_needed(&mut self, _constraint: &u32) {
        self.finalized += 1;
    }
}

/// A dataset of string keys. Every build gets a fresh node id.
#[derive(Debug, Default)]
struct Data {
    keys: Vec<String>,
    built: Vec<usize>,
    next_id: u64,
    // Render steps a node needs before it is finished, by index.
    steps: BTreeMap<usize, u32>,
    missing: Vec<usize>,
}

impl Data {
    fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    fn numbered(count: usize) -> Self {
        Self {
            keys: (0..count).map(|i| format!("k{i}")).collect(),
            ..Self::default()
        }
    }
}

impl ItemBuilder<String, TestNode> for Data {
    fn total_count(&self) -> usize {
        self.keys.len()
    }

    fn build(&mut self, index: usize) -> Option<(String, TestNode)> {
        if self.missing.contains(&index) {
            return None;
        }
        let key = self.keys.get(index)?.clone();
        self.built.push(index);
        self.next_id += 1;
        let node = TestNode {
            id: self.next_id,
            active: true,
            steps_left: self.steps.get(&index).copied().unwrap_or(1),
            finalized: 0,
        };
        Some((key, node))
    }

    fn key_for(&self, index: usize) -> Option<String> {
        self.keys.get(index).cloned()
    }
}

type Cache = LazyCache<TestNode, String>;

fn cache_for(data: &Data) -> Cache {
    LazyCache::new(CacheOptions::new(data.total_count()).with_cache_count(0))
}

/// Sets the window and builds every index it is missing.
fn realize(cache: &mut Cache, data: &mut Data, start: usize, end: usize) {
    cache.set_active_range(start, end);
    for index in cache.missing_in_range() {
        cache.get_or_build(data, index, true, false);
    }
    cache.assert_consistent();
}

fn active_keys(cache: &Cache) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    cache.for_each_active(|index, key, _| out.push((index, key.clone())));
    out
}

fn expected(pairs: &[(usize, &str)]) -> Vec<(usize, String)> {
    pairs.iter().map(|(i, k)| (*i, k.to_string())).collect()
}

fn node_id(cache: &Cache, index: usize) -> u64 {
    cache.node(index).map(|n| n.id).unwrap_or(0)
}

fn disposed_keys(r: &Reconciliation<String, TestNode>) -> Vec<String> {
    r.disposed.iter().map(|(k, _)| k.clone()).collect()
}

fn live_nodes(cache: &Cache) -> usize {
    cache
        .slots
        .values()
        .filter(|slot| cache_slot_has_node(slot))
        .count()
        + cache.disposed.len()
        + usize::from(cache.interrupted.is_some())
}

fn cache_slot_has_node(slot: &crate::store::Slot<TestNode>) -> bool {
    slot.position().has_node()
}

#[test]
fn get_or_build_is_idempotent() {
    let mut data = Data::new(&["a", "b", "c"]);
    let mut cache = cache_for(&data);

    let (k1, n1) = cache.get_or_build(&mut data, 1, true, false).unwrap();
    let id1 = n1.unwrap().id;
    let (k2, n2) = cache.get_or_build(&mut data, 1, true, false).unwrap();
    let id2 = n2.unwrap().id;

    assert_eq!(k1, "b");
    assert_eq!(k1, k2);
    assert_eq!(id1, id2);
    assert_eq!(data.built, vec![1]);
}

#[test]
fn get_or_build_without_need_build_does_not_build() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);

    assert!(cache.get_or_build(&mut data, 0, false, false).is_none());
    assert!(data.built.is_empty());
    assert_eq!(cache.active_len(), 0);
}

#[test]
fn builder_miss_leaves_cache_untouched() {
    let mut data = Data::new(&["a", "b"]);
    data.missing.push(1);
    let mut cache = cache_for(&data);

    assert!(cache.get_or_build(&mut data, 1, true, false).is_none());
    assert!(cache.get_or_build(&mut data, 7, true, false).is_none());
    assert_eq!(cache.active_len(), 0);
    assert_eq!(cache.expiring_len(), 0);
}

#[test]
fn prebuild_parks_node_behind_a_placeholder() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);

    let (key, node) = cache.get_or_build(&mut data, 0, true, true).unwrap();
    assert_eq!(key, "a");
    assert!(node.is_none());
    assert_eq!(cache.position_of(&"a".to_string()), Some(SlotPosition::Parked(0)));
    assert!(cache.node(0).is_none());

    // The next demand promotes the parked node instead of rebuilding it.
    let (_, node) = cache.get_or_build(&mut data, 0, true, false).unwrap();
    let node = node.unwrap();
    assert!(node.active);
    assert_eq!(data.built, vec![0]);
    cache.assert_consistent();
}

#[test]
fn range_symmetry_preserves_node_identity() {
    let mut data = Data::numbered(10);
    let mut cache = cache_for(&data);

    realize(&mut cache, &mut data, 0, 3);
    let ids: Vec<u64> = (0..=3).map(|i| node_id(&cache, i)).collect();

    realize(&mut cache, &mut data, 5, 8);
    assert!(cache.node(0).is_none());
    assert_eq!(cache.position_of(&"k0".to_string()), Some(SlotPosition::Parked(0)));

    realize(&mut cache, &mut data, 0, 3);
    let again: Vec<u64> = (0..=3).map(|i| node_id(&cache, i)).collect();
    assert_eq!(ids, again);
    assert_eq!(data.built.len(), 8);
}

#[test]
fn range_symmetry_survives_compaction() {
    let mut data = Data::numbered(10);
    let mut cache = cache_for(&data);

    realize(&mut cache, &mut data, 0, 3);
    let ids: Vec<u64> = (0..=3).map(|i| node_id(&cache, i)).collect();

    realize(&mut cache, &mut data, 5, 8);
    cache.compact();
    assert_eq!(cache.position_of(&"k2".to_string()), Some(SlotPosition::Expiring(Some(2))));
    assert_eq!(cache.active_len(), 4);

    realize(&mut cache, &mut data, 0, 3);
    let again: Vec<u64> = (0..=3).map(|i| node_id(&cache, i)).collect();
    assert_eq!(ids, again);
    assert_eq!(data.built.len(), 8);
    assert!(cache.node(2).unwrap().active);
}

#[test]
fn set_active_range_reports_changes() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);

    assert!(cache.set_active_range(0, 2));
    assert_eq!(cache.missing_in_range(), vec![0, 1, 2]);
    for i in 0..=2 {
        cache.get_or_build(&mut data, i, true, false);
    }
    assert!(!cache.set_active_range(0, 2));
    assert!(cache.set_active_range(0, 1));
    assert!(cache.node(2).is_none());
}

#[test]
fn shift_map_is_a_step_function() {
    let mut ctx: ReconciliationContext<String, TestNode> = ReconciliationContext::new(10);
    ctx.classify(DatasetOperation::delete(2, 2));
    ctx.classify(DatasetOperation::add(6, 3));
    assert_eq!(ctx.net_delta(), 1);

    let shifts = ctx.shift_map();
    let steps: Vec<isize> = (0..10).map(|i| shifts.shift(i)).collect();
    assert_eq!(steps, vec![0, 0, -2, -2, -2, -2, 1, 1, 1, 1]);
    assert_eq!((shifts.before(6), shifts.after(6)), (-2, 1));
    assert_eq!((shifts.before(2), shifts.after(2)), (0, -2));
    assert_eq!(shifts.before(8), 1);
}

#[test]
fn delete_scenario() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let (a, c, d) = (node_id(&cache, 0), node_id(&cache, 2), node_id(&cache, 3));

    let r = cache.on_dataset_change(&data, [DatasetOperation::delete(1, 1)]);

    assert_eq!(disposed_keys(&r), vec!["b".to_string()]);
    assert_eq!(r.first_affected, Some(1));
    assert!(r.rejected.is_empty());
    assert_eq!(active_keys(&cache), expected(&[(0, "a"), (1, "c"), (2, "d")]));
    assert_eq!(
        (node_id(&cache, 0), node_id(&cache, 1), node_id(&cache, 2)),
        (a, c, d)
    );
    assert_eq!(cache.count(), 3);
    cache.assert_consistent();
}

#[test]
fn move_forward_scenario() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let a = node_id(&cache, 0);

    let r = cache.on_dataset_change(&data, [DatasetOperation::move_item(0, 2)]);

    assert!(r.disposed.is_empty());
    assert_eq!(r.first_affected, Some(0));
    assert_eq!(
        active_keys(&cache),
        expected(&[(0, "b"), (1, "c"), (2, "a"), (3, "d")])
    );
    assert_eq!(node_id(&cache, 2), a);
    assert_eq!(data.built.len(), 4);
    assert_eq!(cache.count(), 4);
    cache.assert_consistent();
}

#[test]
fn move_backward_scenario() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let c = node_id(&cache, 2);

    let r = cache.on_dataset_change(&data, [DatasetOperation::move_item(2, 0)]);

    assert!(r.disposed.is_empty());
    assert_eq!(
        active_keys(&cache),
        expected(&[(0, "c"), (1, "a"), (2, "b"), (3, "d")])
    );
    assert_eq!(node_id(&cache, 0), c);
}

#[test]
fn move_to_last_index() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);

    cache.on_data_moved(1, 3);

    assert_eq!(
        active_keys(&cache),
        expected(&[(0, "a"), (1, "c"), (2, "d"), (3, "b")])
    );
}

#[test]
fn move_with_new_key_renames_the_moved_item() {
    let mut data = Data::new(&["a", "b", "c"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 2);
    let a = node_id(&cache, 0);

    cache.on_dataset_change(
        &data,
        [DatasetOperation::move_item(0, 2).with_key("z".to_string())],
    );

    assert_eq!(active_keys(&cache), expected(&[(0, "b"), (1, "c"), (2, "z")]));
    assert_eq!(node_id(&cache, 2), a);
    assert_eq!(cache.position_of(&"a".to_string()), None);
}

#[test]
fn move_onto_itself_is_a_noop() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);

    let r = cache.on_data_moved(1, 1);
    assert_eq!(r.first_affected, None);
    assert!(r.rejected.is_empty());
    assert_eq!(active_keys(&cache), expected(&[(0, "a"), (1, "b")]));
}

#[test]
fn exchange_swaps_nodes_without_rebuild() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let (a, c) = (node_id(&cache, 0), node_id(&cache, 2));

    let r = cache.on_dataset_change(&data, [DatasetOperation::exchange(0, 2)]);

    assert!(r.disposed.is_empty());
    assert_eq!(
        active_keys(&cache),
        expected(&[(0, "c"), (1, "b"), (2, "a"), (3, "d")])
    );
    assert_eq!((node_id(&cache, 0), node_id(&cache, 2)), (c, a));
    assert_eq!(data.built.len(), 4);
}

#[test]
fn exchange_with_unbuilt_partner() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 2);
    let k1 = node_id(&cache, 1);

    let r = cache.on_dataset_change(&data, [DatasetOperation::exchange(1, 4)]);

    assert!(r.rejected.is_empty());
    assert!(r.disposed.is_empty());
    assert_eq!(active_keys(&cache), expected(&[(0, "k0"), (2, "k2"), (4, "k1")]));
    assert_eq!(cache.position_of(&"k1".to_string()), Some(SlotPosition::Active(4)));
    assert_eq!(node_id(&cache, 4), k1);
    assert!(cache.missing_in_range().contains(&1));
}

#[test]
fn exchange_couple_key_reserves_the_unbuilt_side() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 2);

    cache.on_dataset_change(
        &data,
        [DatasetOperation::exchange(1, 4).with_couple_key("k4".to_string(), "k1".to_string())],
    );

    assert_eq!(cache.position_of(&"k4".to_string()), Some(SlotPosition::Pending(1)));
    assert_eq!(cache.position_of(&"k1".to_string()), Some(SlotPosition::Active(4)));
    cache.assert_consistent();
}

#[test]
fn add_reserves_keyed_rows() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);

    let r = cache.on_dataset_change(
        &data,
        [DatasetOperation::add_keyed(1, ["x".to_string(), "y".to_string()])],
    );

    assert_eq!(r.first_affected, Some(1));
    assert_eq!(
        active_keys(&cache),
        expected(&[(0, "a"), (1, "x"), (2, "y"), (3, "b"), (4, "c"), (5, "d")])
    );
    assert_eq!(cache.position_of(&"x".to_string()), Some(SlotPosition::Pending(1)));
    assert_eq!(cache.count(), 6);
}

#[test]
fn add_at_end_is_in_range() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);

    let r = cache.on_data_bulk_added(2, 3);
    assert!(r.rejected.is_empty());
    assert_eq!(active_keys(&cache), expected(&[(0, "a"), (1, "b")]));
    assert_eq!(cache.count(), 5);
}

#[test]
fn change_drops_the_node_but_keeps_the_key() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let old = node_id(&cache, 2);

    let r = cache.on_data_changed(2);

    assert_eq!(disposed_keys(&r), vec!["c".to_string()]);
    assert_eq!(cache.position_of(&"c".to_string()), Some(SlotPosition::Pending(2)));
    assert!(cache.node(2).is_none());
    assert_eq!(cache.missing_in_range(), vec![2]);

    let (key, node) = cache.get_or_build(&mut data, 2, true, false).unwrap();
    assert_eq!(key, "c");
    assert_ne!(node.unwrap().id, old);
}

#[test]
fn change_with_new_key_renames_the_slot() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);

    cache.on_dataset_change(&data, [DatasetOperation::change(1).with_key("b2".to_string())]);

    assert_eq!(cache.position_of(&"b".to_string()), None);
    assert_eq!(cache.position_of(&"b2".to_string()), Some(SlotPosition::Pending(1)));
}

#[test]
fn conflicting_operations_keep_the_first() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);

    let r = cache.on_dataset_change(
        &data,
        [DatasetOperation::delete(1, 1), DatasetOperation::change(1)],
    );

    assert_eq!(
        r.rejected,
        vec![CacheError::DuplicateOperationTarget {
            kind: OperationKind::Change,
            index: 1,
        }]
    );
    assert_eq!(disposed_keys(&r), vec!["b".to_string()]);
    assert_eq!(active_keys(&cache), expected(&[(0, "a"), (1, "c"), (2, "d")]));
}

#[test]
fn delete_claims_its_whole_range() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 5);

    let r = cache.on_dataset_change(
        &data,
        [DatasetOperation::change(3), DatasetOperation::delete(2, 3)],
    );

    assert_eq!(
        r.rejected,
        vec![CacheError::DuplicateOperationTarget {
            kind: OperationKind::Delete,
            index: 3,
        }]
    );
    assert_eq!(cache.count(), 6);
    assert_eq!(cache.position_of(&"k2".to_string()), Some(SlotPosition::Active(2)));
}

#[test]
fn delete_is_clamped_to_the_dataset() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);

    let r = cache.on_data_bulk_deleted(2, 10);

    assert_eq!(disposed_keys(&r), vec!["c".to_string(), "d".to_string()]);
    assert_eq!(cache.count(), 2);
    assert_eq!(active_keys(&cache), expected(&[(0, "a"), (1, "b")]));
}

#[test]
fn delete_straddles_expiring_entries() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 5);
    let k4 = cache.node(4).unwrap().id;
    cache.set_active_range(0, 1);
    cache.compact();
    assert_eq!(cache.expiring_len(), 4);

    let r = cache.on_data_bulk_deleted(2, 2);

    assert_eq!(disposed_keys(&r).len(), 2);
    assert!(r.disposed.iter().all(|(k, _)| k == "k2" || k == "k3"));
    assert_eq!(cache.position_of(&"k4".to_string()), Some(SlotPosition::Expiring(Some(2))));
    assert_eq!(cache.position_of(&"k5".to_string()), Some(SlotPosition::Expiring(Some(3))));

    // Re-entering the window promotes the shifted node.
    data.keys.drain(2..4);
    realize(&mut cache, &mut data, 2, 2);
    assert_eq!(node_id(&cache, 2), k4);
}

#[test]
fn out_of_range_operations_are_rejected() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);

    let r = cache.on_dataset_change(
        &data,
        [
            DatasetOperation::delete(9, 1),
            DatasetOperation::change(4),
            DatasetOperation::move_item(1, 4),
            DatasetOperation::add(5, 1),
        ],
    );

    assert_eq!(r.rejected.len(), 4);
    assert!(matches!(
        r.rejected[0],
        CacheError::OutOfRangeOperation {
            kind: OperationKind::Delete,
            index: 9,
            count: 4,
        }
    ));
    assert_eq!(r.first_affected, None);
    assert_eq!(active_keys(&cache).len(), 4);
    assert_eq!(cache.count(), 4);
}

#[test]
fn malformed_operations_are_rejected() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);

    let mut no_couple = DatasetOperation::move_item(0, 1);
    no_couple.couple_index = None;
    let r = cache.on_dataset_change(
        &data,
        [no_couple, DatasetOperation::add(0, 0), DatasetOperation::delete(1, 0)],
    );

    assert_eq!(r.rejected.len(), 3);
    assert!(
        r.rejected
            .iter()
            .all(|e| matches!(e, CacheError::MalformedOperation { .. }))
    );
}

#[test]
fn reload_keeps_every_node_with_unknown_position() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let ids: Vec<u64> = (0..=3).map(|i| node_id(&cache, i)).collect();

    data.keys = ["d", "c", "b", "a", "e"].iter().map(|k| k.to_string()).collect();
    let r = cache.on_dataset_change(
        &data,
        [DatasetOperation::move_item(0, 2), DatasetOperation::reload()],
    );

    assert!(r.reloaded);
    assert_eq!(r.first_affected, Some(0));
    assert!(r.disposed.is_empty());
    assert_eq!(cache.active_len(), 0);
    assert_eq!(cache.count(), 5);
    for key in ["a", "b", "c", "d"] {
        let pos = cache.position_of(&key.to_string());
        assert_eq!(pos, Some(SlotPosition::Expiring(None)), "{key}");
    }

    // Keys that survive the reload are re-activated through the builder's key lookup.
    realize(&mut cache, &mut data, 0, 4);
    assert_eq!(node_id(&cache, 3), ids[0]);
    assert_eq!(node_id(&cache, 0), ids[3]);
    assert_eq!(data.built.len(), 5);
}

#[test]
fn on_data_reloaded_sets_the_new_count() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);

    let r = cache.on_data_reloaded(7);
    assert!(r.reloaded);
    assert_eq!(cache.count(), 7);
    assert_eq!(cache.expiring_len(), 2);
}

#[test]
fn dataset_change_abandons_interrupted_predictive_build() {
    let mut data = Data::numbered(6);
    data.steps.insert(3, 3);
    let mut cache = LazyCache::new(CacheOptions::new(6).with_cache_ahead(2).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 2);

    let clock = || 0u64;
    let out = cache.predictive_build(&mut data, &clock, 100, None, true);
    assert_eq!(out.status, PredictiveStatus::TimedOut { resume_at: Some(3) });

    let r = cache.on_data_added(0);
    assert_eq!(disposed_keys(&r), vec!["k3".to_string()]);
    assert!(cache.interrupted.is_none());
}

#[test]
fn predictive_build_resumes_interrupted_item_first() {
    let mut data = Data::numbered(10);
    data.steps.insert(3, 2);
    let mut cache = LazyCache::new(CacheOptions::new(10).with_cache_ahead(2).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 2);
    data.built.clear();

    let now = Cell::new(0u64);
    let clock = || now.get();

    let first = cache.predictive_build(&mut data, &clock, 100, None, true);
    assert_eq!(first.status, PredictiveStatus::TimedOut { resume_at: Some(3) });
    assert_eq!(first.built, 0);
    assert_eq!(data.built, vec![3]);

    let second = cache.predictive_build(&mut data, &clock, 100, None, true);
    assert!(second.is_done());
    assert_eq!(second.built, 2);
    // Index 3 was resumed, not rebuilt, before index 4 was started.
    assert_eq!(data.built, vec![3, 4]);
    assert_eq!(cache.position_of(&"k3".to_string()), Some(SlotPosition::Expiring(Some(3))));
    assert_eq!(cache.position_of(&"k4".to_string()), Some(SlotPosition::Expiring(Some(4))));

    // Predictive nodes are never visible.
    assert!(cache.node(3).is_none());
    assert_eq!(cache.active_len(), 3);

    // Entering the window promotes them without a rebuild.
    realize(&mut cache, &mut data, 2, 4);
    assert_eq!(data.built, vec![3, 4]);
    assert!(cache.node(4).unwrap().active);
}

#[test]
fn predictive_build_stops_at_deadline() {
    let mut data = Data::numbered(10);
    let mut cache = LazyCache::new(CacheOptions::new(10).with_cache_count(2));
    realize(&mut cache, &mut data, 4, 5);
    data.built.clear();

    let now = Cell::new(0u64);
    let clock = || {
        let t = now.get();
        now.set(t + 10);
        t
    };

    // Every `now()` advances 10 units: two items fit before the deadline.
    let out = cache.predictive_build(&mut data, &clock, 20, None, true);
    assert_eq!(out.status, PredictiveStatus::TimedOut { resume_at: None });
    assert_eq!(data.built, vec![6, 7]);
    assert_eq!(out.built, 2);

    let out = cache.predictive_build(&mut data, &|| 0u64, 20, None, true);
    assert!(out.is_done());
    assert_eq!(data.built, vec![6, 7, 3, 2]);
}

#[test]
fn predictive_layout_step_is_gated() {
    let mut data = Data::numbered(4);
    let mut cache = LazyCache::new(CacheOptions::new(4).with_cache_ahead(1).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 0);

    let clock = || 0u64;
    cache.predictive_build(&mut data, &clock, 100, Some(&5), false);
    assert_eq!(cache.slots.get("k1").map(finalized_count), Some(0));

    cache.set_active_range(0, 1);
    cache.get_or_build(&mut data, 1, true, false);
    cache.update_options(|o| o.cache_ahead = 2);
    cache.predictive_build(&mut data, &clock, 100, Some(&5), true);
    assert_eq!(cache.slots.get("k3").map(finalized_count), Some(1));
    assert_eq!(cache.slots.get("k2").map(finalized_count), Some(1));
}

fn finalized_count(slot: &crate::store::Slot<TestNode>) -> u32 {
    match slot {
        crate::store::Slot::Expiring { node, .. } => node.finalized,
        _ => u32::MAX,
    }
}

#[test]
fn predictive_build_counts_builder_misses() {
    let mut data = Data::numbered(5);
    data.missing.push(3);
    let mut cache = LazyCache::new(CacheOptions::new(5).with_cache_ahead(2).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 2);

    let out = cache.predictive_build(&mut data, &|| 0u64, 100, None, false);
    assert!(out.is_done());
    assert_eq!(out.misses, 1);
    assert_eq!(out.built, 1);
}

#[test]
fn layout_finishes_a_suspended_predictive_build() {
    let mut data = Data::numbered(8);
    data.steps.insert(3, 2);
    let mut cache = LazyCache::new(CacheOptions::new(8).with_cache_ahead(2).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 2);
    data.built.clear();

    let clock = || 0u64;
    let out = cache.predictive_build(&mut data, &clock, 100, None, true);
    assert_eq!(out.status, PredictiveStatus::TimedOut { resume_at: Some(3) });

    // The window grows over the suspended index: the half-built node is finished and shown.
    realize(&mut cache, &mut data, 0, 3);
    assert_eq!(data.built, vec![3]);
    assert!(cache.interrupted.is_none());
    assert!(cache.node(3).unwrap().active);
    let visible = node_id(&cache, 3);

    let out = cache.predictive_build(&mut data, &clock, 100, None, true);
    assert!(out.is_done());
    assert_eq!(node_id(&cache, 3), visible);
    assert_eq!(cache.position_of(&"k3".to_string()), Some(SlotPosition::Active(3)));
    assert!(cache.take_disposed().is_empty());
    assert_eq!(data.built, vec![3, 4, 5]);
}

#[test]
fn resumed_build_never_replaces_a_live_node() {
    let mut data = Data::numbered(8);
    data.steps.insert(3, 2);
    let mut cache = LazyCache::new(CacheOptions::new(8).with_cache_ahead(2).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 2);

    let clock = || 0u64;
    cache.predictive_build(&mut data, &clock, 100, None, true);
    assert!(cache.interrupted.is_some());

    cache.set_active_range(0, 3);
    let (key, node) = data.build(3).unwrap();
    let live = node.id;
    cache.insert_slot(
        key,
        crate::store::Slot::Active {
            index: 3,
            node: Some(node),
        },
    );

    let out = cache.predictive_build(&mut data, &clock, 100, None, true);
    assert!(out.is_done());
    assert_eq!(out.built, 2);
    assert_eq!(node_id(&cache, 3), live);
    let disposed = cache.take_disposed();
    assert_eq!(disposed.len(), 1);
    assert_eq!(disposed[0].0, "k3");
    assert_ne!(disposed[0].1.id, live);
    cache.assert_consistent();
}

#[test]
fn predictive_build_reuses_nodes_kept_through_reload() {
    let mut data = Data::numbered(6);
    let mut cache = LazyCache::new(CacheOptions::new(6).with_cache_ahead(2).with_cache_behind(0));
    realize(&mut cache, &mut data, 0, 3);
    let k2 = node_id(&cache, 2);

    let r = cache.on_data_reloaded(6);
    assert!(r.disposed.is_empty());
    realize(&mut cache, &mut data, 0, 1);
    data.built.clear();

    let out = cache.predictive_build(&mut data, &|| 0u64, 100, None, true);
    assert!(out.is_done());
    assert_eq!((out.built, out.reused), (0, 2));
    assert!(data.built.is_empty());
    assert!(cache.take_disposed().is_empty());
    assert_eq!(cache.position_of(&"k3".to_string()), Some(SlotPosition::Expiring(Some(3))));

    realize(&mut cache, &mut data, 0, 3);
    assert!(data.built.is_empty());
    assert_eq!(node_id(&cache, 2), k2);
}

#[test]
fn set_active_range_promotes_returning_expiring_nodes() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    let k3 = node_id(&cache, 3);
    cache.set_active_range(0, 1);
    cache.compact();
    assert_eq!(cache.position_of(&"k3".to_string()), Some(SlotPosition::Expiring(Some(3))));

    assert!(cache.set_active_range(0, 3));
    assert!(cache.missing_in_range().is_empty());
    assert_eq!(node_id(&cache, 3), k3);
    assert!(cache.node(3).unwrap().active);
    cache.assert_consistent();
}

#[test]
fn change_on_an_expiring_item_keeps_its_key() {
    let mut data = Data::numbered(6);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    cache.set_active_range(0, 1);
    cache.compact();

    let r = cache.on_dataset_change(
        &data,
        [DatasetOperation::delete(0, 1), DatasetOperation::change(3)],
    );

    let mut gone = disposed_keys(&r);
    gone.sort();
    assert_eq!(gone, vec!["k0".to_string(), "k3".to_string()]);
    assert_eq!(cache.position_of(&"k3".to_string()), Some(SlotPosition::Pending(2)));
    assert_eq!(cache.position_of(&"k2".to_string()), Some(SlotPosition::Expiring(Some(1))));
    cache.assert_consistent();

    // Pending keys outside the window do not survive compaction.
    cache.compact();
    assert_eq!(cache.position_of(&"k3".to_string()), None);
}

#[test]
fn circular_idle_indices_wrap() {
    let range = ActiveRange {
        start: 0,
        end: 1,
        cache_ahead: 1,
        cache_behind: 1,
        is_circular: true,
    };
    assert_eq!(range.cache_indices(5, 0), vec![2, 4]);
    assert_eq!(range.cache_indices(5, 1), vec![2, 3, 4]);

    let wrapped = ActiveRange {
        start: 3,
        end: 1,
        ..range
    };
    assert!(wrapped.contains(4, 5));
    assert!(wrapped.contains(0, 5));
    assert!(!wrapped.contains(2, 5));
    assert_eq!(wrapped.cache_indices(5, 0), vec![2]);

    let linear = ActiveRange {
        is_circular: false,
        ..range
    };
    assert_eq!(linear.cache_indices(5, 0), vec![2]);
    assert!(!ActiveRange { is_circular: false, ..wrapped }.contains(4, 5));
}

#[test]
fn circular_window_tracks_wrapped_indices() {
    let mut data = Data::numbered(6);
    let mut cache = LazyCache::new(CacheOptions::new(6).with_cache_count(0).with_circular(true));

    realize(&mut cache, &mut data, 4, 1);
    assert_eq!(
        active_keys(&cache),
        expected(&[(0, "k0"), (1, "k1"), (4, "k4"), (5, "k5")])
    );
    cache.update_options(|o| o.cache_ahead = 1);
    assert_eq!(cache.idle_indices(), vec![2]);
}

#[test]
fn compact_derives_window_from_live_items() {
    let mut data = Data::numbered(6);
    let mut cache: Cache = LazyCache::new(CacheOptions::new(6).with_circular(true));
    for i in [1, 3, 5] {
        cache.get_or_build(&mut data, i, true, false);
    }

    let items = cache.compact();
    let indices: Vec<usize> = items.iter().map(|item| item.index).collect();
    assert_eq!(indices, vec![1, 3, 5]);
    let range = cache.active_range().unwrap();
    assert_eq!((range.start, range.end), (3, 1));

    cache.set_options(CacheOptions::new(6));
    cache.compact();
    let range = cache.active_range().unwrap();
    assert_eq!((range.start, range.end), (1, 5));
}

#[test]
fn compact_retires_parked_items() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 3);
    cache.set_active_range(0, 1);
    assert_eq!(cache.active_len(), 4);

    let items = cache.compact();
    assert_eq!(items.len(), 2);
    assert_eq!(cache.active_len(), 2);
    assert_eq!(cache.position_of(&"c".to_string()), Some(SlotPosition::Expiring(Some(2))));
    assert!(!cache.slots.values().any(|s| matches!(s, crate::store::Slot::Parked { .. })));
    cache.assert_consistent();
}

#[test]
fn expiring_capacity_evicts_oldest_first() {
    let mut data = Data::new(&["a", "b", "c", "d"]);
    let mut cache = LazyCache::new(
        CacheOptions::new(4)
            .with_cache_count(0)
            .with_expiring_capacity(Some(1)),
    );
    realize(&mut cache, &mut data, 0, 3);
    cache.set_active_range(0, 0);
    cache.compact();

    assert_eq!(cache.expiring_len(), 1);
    let evicted: Vec<String> = cache.take_disposed().into_iter().map(|(k, _)| k).collect();
    assert_eq!(evicted, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(cache.position_of(&"d".to_string()), Some(SlotPosition::Expiring(Some(3))));
}

#[test]
fn drop_index_disposes_the_node() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);

    cache.drop_index(1);
    cache.drop_index(9);
    assert_eq!(active_keys(&cache), expected(&[(0, "a")]));
    let disposed = cache.take_disposed();
    assert_eq!(disposed.len(), 1);
    assert_eq!(disposed[0].0, "b");
    assert!(cache.take_disposed().is_empty());
}

#[test]
fn builder_key_collision_disposes_the_older_node() {
    let mut data = Data::new(&["a", "b"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 1);
    let old = node_id(&cache, 0);

    // The record "a" now reports from index 1 as well.
    data.keys[1] = "a".to_string();
    cache.drop_index(1);
    cache.take_disposed();
    cache.get_or_build(&mut data, 1, true, false);

    let disposed = cache.take_disposed();
    assert_eq!(disposed.len(), 1);
    assert_eq!(disposed[0].1.id, old);
    assert_eq!(active_keys(&cache), expected(&[(1, "a")]));
    cache.assert_consistent();
}

#[test]
fn demote_clear_and_activity_toggle() {
    let mut data = Data::new(&["a", "b", "c"]);
    let mut cache = cache_for(&data);
    realize(&mut cache, &mut data, 0, 2);

    cache.set_all_active(false);
    assert!(!cache.node(1).unwrap().active);
    cache.set_all_active(true);
    assert!(cache.node(1).unwrap().active);

    cache.demote_all();
    assert_eq!(cache.active_len(), 0);
    assert_eq!(cache.expiring_len(), 3);
    assert_eq!(cache.position_of(&"b".to_string()), Some(SlotPosition::Expiring(Some(1))));

    cache.clear();
    assert_eq!(cache.expiring_len(), 0);
    assert_eq!(cache.take_disposed().len(), 3);
}

#[test]
fn lcg_batches_conserve_nodes() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..200 {
        let mut data = Data::numbered(12);
        let mut cache = LazyCache::new(CacheOptions::new(12).with_cache_count(1));
        let start = rng.gen_range_usize(0, 8);
        realize(&mut cache, &mut data, start, start + 3);
        cache.predictive_build(&mut data, &|| 0u64, 100, None, false);
        cache.set_active_range(0, rng.gen_range_usize(0, 6));
        let built = data.built.len();

        let mut ops = Vec::new();
        for _ in 0..rng.gen_range_usize(1, 6) {
            let index = rng.gen_range_usize(0, 13);
            let other = rng.gen_range_usize(0, 12);
            ops.push(match rng.gen_range_usize(0, 5) {
                0 => DatasetOperation::add(index, rng.gen_range_usize(1, 3)),
                1 => DatasetOperation::delete(index, rng.gen_range_usize(1, 3)),
                2 => DatasetOperation::change(index),
                3 => DatasetOperation::move_item(index, other),
                _ => DatasetOperation::exchange(index, other),
            });
        }
        let r = cache.on_dataset_change(&data, ops);
        cache.assert_consistent();
        assert_eq!(live_nodes(&cache) + r.disposed.len(), built);
    }
}

/// Applies non-conflicting adds and deletes to a plain list, highest index first, so every
/// index still refers to the list before the batch.
fn simulate(keys: &[String], ops: &[(usize, Option<usize>)]) -> Vec<Option<String>> {
    let mut list: Vec<Option<String>> = keys.iter().cloned().map(Some).collect();
    let mut sorted = ops.to_vec();
    sorted.sort_by(|a, b| b.0.cmp(&a.0));
    for (index, add) in sorted {
        match add {
            Some(n) => {
                for _ in 0..n {
                    list.insert(index, None);
                }
            }
            None => {
                list.remove(index);
            }
        }
    }
    list
}

proptest! {
    #[test]
    fn untouched_items_follow_the_shift_function(
        n in 1usize..24,
        raw in prop::collection::btree_map(0usize..25, prop::option::of(1usize..4), 0..8),
    ) {
        let mut data = Data::numbered(n);
        let mut cache = LazyCache::new(CacheOptions::new(n).with_cache_count(0));
        realize(&mut cache, &mut data, 0, n - 1);

        let ops: Vec<(usize, Option<usize>)> = raw
            .into_iter()
            .filter(|(i, add)| *i < n || (*i == n && add.is_some()))
            .collect();
        let batch: Vec<DatasetOperation<String>> = ops
            .iter()
            .map(|&(i, add)| match add {
                Some(c) => DatasetOperation::add(i, c),
                None => DatasetOperation::delete(i, 1),
            })
            .collect();

        let r = cache.on_dataset_change(&data, batch);
        prop_assert!(r.rejected.is_empty());

        let want = simulate(&data.keys, &ops);
        prop_assert_eq!(cache.count(), want.len());
        for (index, key) in want.iter().enumerate() {
            match key {
                Some(key) => prop_assert_eq!(cache.key_at(index), Some(key)),
                None => prop_assert!(cache.key_at(index).is_none()),
            }
        }
        cache.assert_consistent();
    }

    #[test]
    fn duplicate_targets_reject_exactly_one(
        n in 2usize..16,
        index in 0usize..16,
        first in 0usize..3,
        second in 0usize..3,
    ) {
        let index = index % n;
        let mut data = Data::numbered(n);
        let mut cache = LazyCache::new(CacheOptions::new(n).with_cache_count(0));
        realize(&mut cache, &mut data, 0, n - 1);

        let op = |kind: usize| match kind {
            0 => DatasetOperation::add(index, 1),
            1 => DatasetOperation::delete(index, 1),
            _ => DatasetOperation::change(index),
        };
        let r = cache.on_dataset_change(&data, [op(first), op(second)]);

        prop_assert_eq!(r.rejected.len(), 1);
        let is_duplicate = matches!(
            r.rejected[0],
            CacheError::DuplicateOperationTarget { index: i, .. } if i == index
        );
        prop_assert!(is_duplicate);
        prop_assert_eq!(r.first_affected, Some(index));
        cache.assert_consistent();
    }
}
