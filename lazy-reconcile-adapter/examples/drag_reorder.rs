use lazy_reconcile::{CacheOptions, ItemNode};
use lazy_reconcile_adapter::Controller;

#[derive(Debug)]
struct Card(&'static str);

impl ItemNode for Card {
    type Constraint = ();

    fn set_active(&mut self, _active: bool) {}

    fn render_incremental(&mut self, _deadline: u64) -> bool {
        true
    }

    fn finalize_layout_if_needed(&mut self, _constraint: &()) {}
}

fn main() {
    let cards = ["todo", "doing", "review", "done"];
    let builder = (cards.len(), move |i: usize| {
        cards.get(i).map(|&c| (c.to_string(), Card(c)))
    });
    let mut c = Controller::new(CacheOptions::default(), builder, || 0u64);
    c.on_layout(0, 3, |_, _| {});

    // The user drags "todo" down two rows. The dataset is untouched until the drop.
    c.on_drag(0, 1);
    c.on_drag(1, 2);
    let shown: Vec<_> = (0..4)
        .filter_map(|i| c.node_at_display(i).map(|n| n.0))
        .collect();
    println!("while dragging: {shown:?}");

    if let Some(r) = c.on_drop(|_, _| {}) {
        println!("dropped: first_affected={:?}", r.first_affected);
    }
    c.cache().for_each_active(|index, key, _| println!("{index}: {key}"));
}
