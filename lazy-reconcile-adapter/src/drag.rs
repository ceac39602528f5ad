/// Display-to-data index mapping while an item is dragged to a new position.
///
/// During the drag, the dataset is unchanged: the UI shows the dragged item at `to` and the items
/// in between shifted by one toward `from`. [`DragReorder::convert`] tells which data index to
/// draw at a display index. On drop, [`DragReorder::finish`] yields the single move to apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DragReorder {
    from: Option<usize>,
    to: usize,
}

impl DragReorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.from.is_some()
    }

    /// Records that the dragged item is now shown at `to`.
    ///
    /// `from` is only read on the first update of a drag; later updates keep the original data
    /// index of the dragged item.
    pub fn update(&mut self, from: usize, to: usize) {
        if self.from.is_none() {
            self.from = Some(from);
        }
        self.to = to;
    }

    /// Data index shown at display `index`.
    pub fn convert(&self, index: usize) -> usize {
        let Some(from) = self.from else {
            return index;
        };
        let to = self.to;
        if index == to {
            return from;
        }
        if from < to && (from..to).contains(&index) {
            return index + 1;
        }
        if to < from && index > to && index <= from {
            return index - 1;
        }
        index
    }

    /// Ends the drag. Returns `(from, to)` unless the item was dropped where it started.
    pub fn finish(&mut self) -> Option<(usize, usize)> {
        let from = self.from.take()?;
        let to = core::mem::take(&mut self.to);
        (from != to).then_some((from, to))
    }

    /// Ends the drag without a move.
    pub fn cancel(&mut self) {
        *self = Self::default();
    }
}
