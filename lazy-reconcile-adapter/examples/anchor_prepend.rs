use lazy_reconcile::{CacheOptions, DatasetOperation, ItemBuilder, ItemNode};
use lazy_reconcile_adapter::Controller;

#[derive(Debug)]
struct Message(String);

impl ItemNode for Message {
    type Constraint = ();

    fn set_active(&mut self, _active: bool) {}

    fn render_incremental(&mut self, _deadline: u64) -> bool {
        true
    }

    fn finalize_layout_if_needed(&mut self, _constraint: &()) {}
}

struct Timeline(Vec<u64>);

impl ItemBuilder<u64, Message> for Timeline {
    fn total_count(&self) -> usize {
        self.0.len()
    }

    fn build(&mut self, index: usize) -> Option<(u64, Message)> {
        let id = *self.0.get(index)?;
        Some((id, Message(format!("message #{id}"))))
    }
}

fn main() {
    // Example: keep the window on the same message across "prepend" (load older messages).
    //
    // The adapter flow is typically:
    // 1) capture an anchor (key + offset_in_window) before data changes
    // 2) apply data changes to the builder, then report them to the controller
    // 3) restore the anchor to get the window that shows the same message in the same place
    let timeline = Timeline((1000..1100).collect());
    let mut c = Controller::new(CacheOptions::default(), timeline, || 0u64);
    c.on_layout(50, 59, |_, _| {});

    let Some(anchor) = c.capture_first_active_anchor() else {
        return;
    };
    println!("before prepend: anchor={anchor:?}");

    let mut ids: Vec<u64> = (900..910).collect();
    ids.append(&mut c.builder_mut().0);
    c.builder_mut().0 = ids;
    c.on_dataset_change([DatasetOperation::add(0, 10)], |_, _| {});

    let Some((start, end)) = c.restore_anchor(&anchor, 10, |_| None) else {
        return;
    };
    let items = c.on_layout(start, end, |_, _| {});
    println!("after prepend: window=[{start}, {end}] first={:?}", items.first());
    if let Some(message) = c.cache().node(start) {
        println!("top of window: {}", message.0);
    }
}
