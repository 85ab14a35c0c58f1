//! Domain logic for the tree grid.
//!
//! This module contains the data/index model:
//! - Lazy node tree (materialization, flat counts, reference counting, refresh)
//! - Node references (counted handles)
//! - Flat indexing (node <-> row index, pre-order navigation)
//! - Expansion (bulk expand/collapse, snapshots)

pub mod node_tree;
pub mod node_ref;
pub mod flat_index;
pub mod expansion;

pub use node_tree::{NodeTree, NodeId, NodeKind, TreeNode, ItemsChange};
pub use node_ref::NodeRef;
pub use flat_index::FlatIndex;
pub use expansion::ExpansionSnapshot;
