use lazy_reconcile::{CacheOptions, DatasetOperation, ItemBuilder, ItemNode, LazyCache};

#[derive(Debug)]
struct Label {
    text: String,
    active: bool,
}

impl ItemNode for Label {
    type Constraint = ();

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn render_incremental(&mut self, _deadline: u64) -> bool {
        true
    }

    fn finalize_layout_if_needed(&mut self, _constraint: &()) {}
}

struct Names(Vec<String>);

impl ItemBuilder<String, Label> for Names {
    fn total_count(&self) -> usize {
        self.0.len()
    }

    fn build(&mut self, index: usize) -> Option<(String, Label)> {
        let name = self.0.get(index)?.clone();
        println!("  build {index} -> {name}");
        let text = format!("<{name}>");
        Some((name, Label { text, active: true }))
    }

    fn key_for(&self, index: usize) -> Option<String> {
        self.0.get(index).cloned()
    }
}

fn print_active(cache: &LazyCache<Label, String>) {
    cache.for_each_active(|index, key, node| {
        println!("  {index}: {key} {:?}", node.map(|n| (n.text.as_str(), n.active)));
    });
}

fn main() {
    let mut names = Names((0..1_000).map(|i| format!("row-{i}")).collect());
    let mut cache = LazyCache::new(CacheOptions::new(names.total_count()).with_cache_count(2));

    println!("window [10, 14]:");
    cache.set_active_range(10, 14);
    for index in cache.missing_in_range() {
        cache.get_or_build(&mut names, index, true, false);
    }
    cache.compact();

    let clock = || 0u64;
    let out = cache.predictive_build(&mut names, &clock, 1, None, false);
    println!("predictive pass: {out:?}");

    println!("scroll to [12, 16] (rows 15 and 16 were prebuilt):");
    cache.set_active_range(12, 16);
    for index in cache.missing_in_range() {
        cache.get_or_build(&mut names, index, true, false);
    }
    cache.compact();
    print_active(&cache);

    names.0.remove(13);
    names.0.insert(0, "header".to_string());
    let r = cache.on_dataset_change(
        &names,
        [
            DatasetOperation::delete(13, 1),
            DatasetOperation::add_keyed(0, ["header".to_string()]),
        ],
    );
    println!(
        "after batch: first_affected={:?} disposed={:?}",
        r.first_affected,
        r.disposed.iter().map(|(k, _)| k).collect::<Vec<_>>()
    );
    print_active(&cache);
    println!("still missing: {:?}", cache.missing_in_range());
}
