// Example: nodes follow their keys through moves and exchanges without being rebuilt.
use lazy_reconcile::{CacheOptions, DatasetOperation, LazyCache};

#[derive(Debug)]
struct Node(u32);

impl lazy_reconcile::ItemNode for Node {
    type Constraint = ();

    fn set_active(&mut self, _active: bool) {}

    fn render_incremental(&mut self, _deadline: u64) -> bool {
        true
    }

    fn finalize_layout_if_needed(&mut self, _constraint: &()) {}
}

fn main() {
    let keys = ["a", "b", "c", "d", "e"];
    let mut next = 0u32;
    let mut builder = (keys.len(), |i: usize| {
        next += 1;
        keys.get(i).map(|k| (k.to_string(), Node(next)))
    });

    let mut cache = LazyCache::new(CacheOptions::new(keys.len()).with_cache_count(0));
    cache.set_active_range(0, 4);
    for index in cache.missing_in_range() {
        cache.get_or_build(&mut builder, index, true, false);
    }

    let r = cache.on_dataset_change(
        &builder,
        [DatasetOperation::move_item(0, 3), DatasetOperation::exchange(1, 4)],
    );
    println!("rejected={:?} disposed={}", r.rejected, r.disposed.len());

    // Node ids are unchanged: only positions moved.
    cache.for_each_active(|index, key, node| {
        println!("{index}: {key} node={:?}", node.map(|n| n.0));
    });
}
