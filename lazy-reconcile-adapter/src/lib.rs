//! Adapter utilities for the `lazy-reconcile` crate.
//!
//! The `lazy-reconcile` crate is UI-agnostic and focuses on which items are realized and how
//! they survive dataset changes. This crate provides small, framework-neutral helpers commonly
//! needed by adapters:
//!
//! - A frame controller owning the cache, the item builder, and the clock
//! - Item anchors (keep the window on the same item across a prepend or reorder)
//! - Display-to-data index mapping while an item is dragged
//!
//! This crate is intentionally framework-agnostic (no widget toolkit bindings).
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod anchor;
mod controller;
mod drag;


pub use anchor::{ItemAnchor, capture_first_active_anchor, resolve_anchor};
pub use controller::Controller;
pub use drag::DragReorder;
