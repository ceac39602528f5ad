//! A headless cache for lazily built list items.
//!
//! For frame-loop helpers (a controller, key anchors, drag reordering), see the
//! `lazy-reconcile-adapter` crate.
//!
//! A long list only realizes the items near its visible window. This crate keeps track of
//! which items are realized and makes their identity survive dataset mutation:
//!
//! - an active window with cache margins, optionally wrapping for circular lists;
//! - an expiring cache that lets items re-enter the window without a rebuild;
//! - batched reconciliation of add/delete/change/move/exchange/reload operations, all expressed
//!   against the dataset as it was before the batch;
//! - deadline-bound predictive builds during idle time.
//!
//! It is UI-agnostic. A UI layer is expected to provide:
//! - an [`ItemBuilder`] turning a data index into a `(key, node)` pair
//! - an [`ItemNode`] implementation for its realized nodes
//! - a [`Clock`] for deadline checks
//!
//! Removed nodes are handed back as values; the caller owns their teardown.
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

mod builder;
mod classify;
mod error;
mod key;
mod operation;
mod options;
mod predictive;
mod range;
mod reconcile;
mod store;
mod types;

#[cfg(test)]
mod tests;

#[cfg(feature = "std")]
pub use builder::SystemClock;
pub use builder::{Clock, ItemBuilder, ItemNode};
pub use error::CacheError;
pub use key::CacheKey;
pub use operation::{DatasetOperation, OperationKind};
pub use options::CacheOptions;
pub use range::ActiveRange;
pub use store::LazyCache;
pub use types::{CachedItem, PredictiveOutcome, PredictiveStatus, Reconciliation, SlotPosition};
