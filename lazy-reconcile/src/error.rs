use crate::OperationKind;

/// Recoverable failures reported by the cache.
///
/// None of these abort a batch: the offending operation (or index) is skipped, the error is
/// logged, and the rest of the work proceeds.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The operation's index is outside the pre-batch dataset.
    #[error("{kind} operation at index {index} is out of range (count = {count})")]
    OutOfRangeOperation {
        kind: OperationKind,
        index: usize,
        count: usize,
    },

    /// Another operation in the same batch already targets this original index.
    #[error("{kind} operation targets index {index}, which is already claimed in this batch")]
    DuplicateOperationTarget { kind: OperationKind, index: usize },

    /// The operation is missing a field its kind requires, or has a zero count.
    #[error("malformed {kind} operation: {reason}")]
    MalformedOperation {
        kind: OperationKind,
        reason: &'static str,
    },

    /// The item builder returned nothing for this index.
    #[error("item builder returned nothing for index {index}")]
    BuilderMiss { index: usize },
}
