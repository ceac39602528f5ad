use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// The kind of a dataset-change operation.
///
/// With `feature = "serde"`, kinds use their lowercase wire names (`"add"`, `"delete"`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OperationKind {
    Add,
    Delete,
    Change,
    Move,
    Exchange,
    Reload,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Change => "change",
            Self::Move => "move",
            Self::Exchange => "exchange",
            Self::Reload => "reload",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a batched dataset change.
///
/// Every index refers to the dataset as it was *before* the batch. Which fields matter depends
/// on `kind`:
///
/// | kind | fields |
/// |---|---|
/// | `Add` | `index`, `count`, optional `key` or `key_list` for the new rows |
/// | `Delete` | `index`, `count` |
/// | `Change` | `index`, optional new `key` |
/// | `Move` | `couple_index = (from, to)`, optional new `key` for the moved row |
/// | `Exchange` | `couple_index = (a, b)`, optional `couple_key = (key now at a, key now at b)` |
/// | `Reload` | none |
///
/// With `feature = "serde"`, this type uses the camelCase wire shape
/// `{type, index, count, coupleIndex, key, coupleKey, keyList}`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DatasetOperation<K = String> {
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: OperationKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub index: usize,
    #[cfg_attr(feature = "serde", serde(default = "default_count"))]
    pub count: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub couple_index: Option<(usize, usize)>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub key: Option<K>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub couple_key: Option<(K, K)>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub key_list: Vec<K>,
}

#[cfg(feature = "serde")]
fn default_count() -> usize {
    1
}

impl<K> DatasetOperation<K> {
    fn new(kind: OperationKind, index: usize, count: usize) -> Self {
        Self {
            kind,
            index,
            count,
            couple_index: None,
            key: None,
            couple_key: None,
            key_list: Vec::new(),
        }
    }

    pub fn add(index: usize, count: usize) -> Self {
        Self::new(OperationKind::Add, index, count)
    }

    /// Inserts one row per key at `index`.
    pub fn add_keyed(index: usize, keys: impl IntoIterator<Item = K>) -> Self {
        let mut op = Self::new(OperationKind::Add, index, 0);
        op.key_list.extend(keys);
        op.count = op.key_list.len();
        op
    }

    pub fn delete(index: usize, count: usize) -> Self {
        Self::new(OperationKind::Delete, index, count)
    }

    pub fn change(index: usize) -> Self {
        Self::new(OperationKind::Change, index, 1)
    }

    pub fn move_item(from: usize, to: usize) -> Self {
        let mut op = Self::new(OperationKind::Move, from, 1);
        op.couple_index = Some((from, to));
        op
    }

    pub fn exchange(a: usize, b: usize) -> Self {
        let mut op = Self::new(OperationKind::Exchange, a, 1);
        op.couple_index = Some((a, b));
        op
    }

    pub fn reload() -> Self {
        Self::new(OperationKind::Reload, 0, 0)
    }

    pub fn with_key(mut self, key: K) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_couple_key(mut self, at_a: K, at_b: K) -> Self {
        self.couple_key = Some((at_a, at_b));
        self
    }
}
