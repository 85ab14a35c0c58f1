//! Counted handles to tree nodes.

use crate::domain::node_tree::NodeId;

/// A counted reference to a [`NodeTree`](crate::domain::NodeTree) node.
///
/// Every `NodeRef` owns one unit of its node's reference count. The tree
/// hands them out ([`NodeTree::create_node_reference`],
/// [`NodeTree::clone_ref`]) and takes them back with
/// [`NodeTree::release`], which consumes the handle so it cannot be
/// released twice.
///
/// Two references are equal iff they point at the same node. A reference
/// can be moved along the flattened sequence in place
/// ([`NodeTree::move_to_next`] and friends); the move acquires the new
/// node before releasing the old one, so scanning does not allocate
/// handles.
///
/// [`NodeTree::create_node_reference`]: crate::domain::NodeTree::create_node_reference
/// [`NodeTree::clone_ref`]: crate::domain::NodeTree::clone_ref
/// [`NodeTree::release`]: crate::domain::NodeTree::release
/// [`NodeTree::move_to_next`]: crate::domain::NodeTree::move_to_next
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "node references must be released back to their tree"]
pub struct NodeRef {
    id: NodeId,
}

impl NodeRef {
    pub(crate) fn new(id: NodeId) -> Self {
        Self { id }
    }

    /// Identity of the referenced node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}
