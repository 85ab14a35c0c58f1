//! State management modules for the tree grid.
//!
//! This module contains state-only logic (no layout concerns):
//! - Selection state (selected nodes, current node, anchor, coalesced events)

mod selection;

pub use selection::{SelectionModel, SelectMode};
