//! Mapping between tree nodes and flat row indices.
//!
//! The flattened sequence is the pre-order walk of the tree that only
//! descends into expanded nodes. Nothing is stored per row: positions are
//! derived from the sparse child maps and the cached `flat_count`s, so a
//! lookup costs O(depth × expanded siblings) no matter how many rows the
//! tree holds.

use crate::domain::node_ref::NodeRef;
use crate::domain::node_tree::{NodeId, NodeKind, NodeTree, TreeNode};
use crate::traits::ItemSource;

/// Position of a node in the flattened sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatIndex {
    /// Zero-based row index.
    pub index: usize,
    /// `false` if some ancestor is collapsed, in which case `index` is
    /// where the row would be once the ancestors are expanded.
    pub fully_visible: bool,
}

/// Outcome of scanning one level during a top-down lookup.
enum LevelHit {
    /// The target is the item at this index of the current node.
    Item(usize),
    /// The target lies inside this expanded child, at the given offset.
    Descend(NodeId, usize),
}

impl<S: ItemSource> NodeTree<S> {
    /// Rows that precede child `child_index` inside `parent`'s subtree:
    /// one per earlier sibling, plus everything their expanded subtrees
    /// contribute.
    fn child_offset(&self, parent: &TreeNode<S::Item>, child_index: usize) -> usize {
        let expanded_rows: usize = parent
            .children
            .range(..child_index)
            .filter_map(|(_, &child)| self.node(child))
            .filter(|child| child.is_expanded)
            .map(|child| child.flat_count)
            .sum();
        child_index + expanded_rows
    }

    /// Computes a node's flat index by walking up to the root.
    ///
    /// # Returns
    /// `None` for the root (which has no row of its own) and for
    /// invalidated nodes.
    pub fn try_get_flat_index(&self, id: NodeId) -> Option<FlatIndex> {
        let node = self.node(id)?;
        if node.kind == NodeKind::Root {
            return None;
        }

        let mut index = 0;
        let mut fully_visible = true;
        let mut current = node;
        loop {
            let child_index = current.child_index?;
            let parent = self.node(current.parent?)?;
            index += self.child_offset(parent, child_index);
            if parent.kind == NodeKind::Root {
                break;
            }
            if !parent.is_expanded {
                fully_visible = false;
            }
            // The parent's own row sits directly above its children.
            index += 1;
            current = parent;
        }
        Some(FlatIndex { index, fully_visible })
    }

    /// Flat index of a referenced node, if it is valid.
    pub fn flat_index(&self, node: &NodeRef) -> Option<FlatIndex> {
        self.try_get_flat_index(node.id())
    }

    /// Finds the node occupying row `flat_index` and returns a reference
    /// to it, materializing the node if needed.
    ///
    /// # Returns
    /// `None` if `flat_index` is past the end of the sequence.
    pub fn create_node_reference(&mut self, flat_index: usize) -> Option<NodeRef> {
        if flat_index >= self.total_rows() {
            return None;
        }
        let mut current = self.root();
        let mut remaining = flat_index;
        loop {
            self.ensure_items(current);
            let hit = self.scan_level(current, remaining)?;
            match hit {
                LevelHit::Item(item_index) => {
                    let id = self.get_or_create_child(current, item_index)?;
                    return Some(self.acquire(id));
                }
                LevelHit::Descend(child, offset) => {
                    current = child;
                    remaining = offset;
                }
            }
        }
    }

    fn scan_level(&self, id: NodeId, target: usize) -> Option<LevelHit> {
        let node = self.node(id)?;
        let mut consumed = 0;
        for (&child_index, &child_id) in &node.children {
            let Some(child) = self.node(child_id) else {
                continue;
            };
            if !child.is_expanded {
                continue;
            }
            let row = child_index + consumed;
            if target <= row {
                break;
            }
            if target <= row + child.flat_count {
                return Some(LevelHit::Descend(child_id, target - row - 1));
            }
            consumed += child.flat_count;
        }
        let item_index = target - consumed;
        if item_index >= node.item_count() {
            debug_assert!(false, "flat index {target} beyond node's rows");
            return None;
        }
        Some(LevelHit::Item(item_index))
    }

    // ===== Navigation =====

    fn next_flat_node(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        if node.is_invalidated() || node.kind == NodeKind::Root {
            return None;
        }
        if node.is_expanded {
            self.ensure_items(id);
            if self.node(id).is_some_and(|node| node.item_count() > 0) {
                return self.get_or_create_child(id, 0);
            }
        }

        let mut current = id;
        loop {
            let node = self.node(current)?;
            let child_index = node.child_index?;
            let parent_id = node.parent?;
            let parent = self.node(parent_id)?;
            if child_index + 1 < parent.item_count() {
                return self.get_or_create_child(parent_id, child_index + 1);
            }
            if parent.kind == NodeKind::Root {
                return None;
            }
            current = parent_id;
        }
    }

    fn previous_flat_node(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        let child_index = node.child_index?;
        let parent_id = node.parent?;
        if child_index == 0 {
            let parent = self.node(parent_id)?;
            return (parent.kind != NodeKind::Root).then_some(parent_id);
        }

        // Last visible descendant of the previous sibling.
        let mut current = self.get_or_create_child(parent_id, child_index - 1)?;
        loop {
            let node = self.node(current)?;
            if !node.is_expanded {
                return Some(current);
            }
            self.ensure_items(current);
            let count = self.node(current).map_or(0, |node| node.item_count());
            if count == 0 {
                return Some(current);
            }
            current = self.get_or_create_child(current, count - 1)?;
        }
    }

    /// Advances a reference to the next row (pre-order successor).
    ///
    /// # Returns
    /// `false`, leaving the reference untouched, at the end of the
    /// sequence or when the node has been invalidated.
    pub fn move_to_next(&mut self, node: &mut NodeRef) -> bool {
        match self.next_flat_node(node.id()) {
            Some(next) => {
                self.retarget(node, next);
                true
            }
            None => false,
        }
    }

    /// Moves a reference to the previous row (pre-order predecessor).
    pub fn move_to_previous(&mut self, node: &mut NodeRef) -> bool {
        match self.previous_flat_node(node.id()) {
            Some(previous) => {
                self.retarget(node, previous);
                true
            }
            None => false,
        }
    }

    /// Moves a reference to its parent. Fails for top-level nodes.
    pub fn move_to_parent(&mut self, node: &mut NodeRef) -> bool {
        let parent = self
            .node(node.id())
            .filter(|n| !n.is_invalidated())
            .and_then(|n| n.parent)
            .filter(|&parent| self.node(parent).is_some_and(|p| p.kind == NodeKind::Child));
        match parent {
            Some(parent) => {
                self.retarget(node, parent);
                true
            }
            None => false,
        }
    }

    /// Moves a reference to one of its children, loading them if needed.
    pub fn move_to_child(&mut self, node: &mut NodeRef, item_index: usize) -> bool {
        if !self.is_valid(node.id()) {
            return false;
        }
        self.ensure_items(node.id());
        if item_index >= self.node(node.id()).map_or(0, |n| n.item_count()) {
            return false;
        }
        match self.get_or_create_child(node.id(), item_index) {
            Some(child) => {
                self.retarget(node, child);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FnSource;

    fn numbered(top: usize, fanout: usize) -> NodeTree<FnSource<Vec<usize>>> {
        NodeTree::new(FnSource::new(
            (0..top).map(|i| vec![i]).collect(),
            move |path: &Vec<usize>| {
                (path.len() < 3).then(|| {
                    (0..fanout)
                        .map(|i| {
                            let mut child = path.clone();
                            child.push(i);
                            child
                        })
                        .collect()
                })
            },
            |path: &Vec<usize>| path.len() < 3,
        ))
    }

    fn expand_path(tree: &mut NodeTree<FnSource<Vec<usize>>>, path: &[usize]) -> NodeId {
        let mut current = tree.root();
        for &index in path {
            current = tree.get_or_create_child(current, index).unwrap();
            tree.set_expanded(current, true);
        }
        current
    }

    #[test]
    fn test_root_has_no_flat_index() {
        let tree = numbered(3, 2);
        assert_eq!(tree.try_get_flat_index(tree.root()), None);
    }

    #[test]
    fn test_create_reference_walks_expanded_children() {
        let mut tree = numbered(3, 2);
        expand_path(&mut tree, &[1]);
        expand_path(&mut tree, &[1, 0]);
        // [0] [1] [1,0] [1,0,0] [1,0,1] [1,1] [2]
        let expected: Vec<Vec<usize>> = vec![
            vec![0],
            vec![1],
            vec![1, 0],
            vec![1, 0, 0],
            vec![1, 0, 1],
            vec![1, 1],
            vec![2],
        ];
        assert_eq!(tree.total_rows(), expected.len());
        for (index, path) in expected.iter().enumerate() {
            let r = tree.create_node_reference(index).unwrap();
            assert_eq!(tree.item(r.id()), Some(path));
            assert_eq!(
                tree.flat_index(&r),
                Some(FlatIndex { index, fully_visible: true })
            );
            tree.release(r);
        }
        assert!(tree.create_node_reference(expected.len()).is_none());
        tree.verify().unwrap();
    }

    #[test]
    fn test_flat_index_under_collapsed_parent() {
        let mut tree = numbered(2, 2);
        let parent = expand_path(&mut tree, &[0]);
        let child = tree.get_or_create_child(parent, 1).unwrap();
        let r = tree.acquire(child);
        tree.set_expanded(parent, false);
        assert_eq!(
            tree.flat_index(&r),
            Some(FlatIndex { index: 2, fully_visible: false })
        );
        tree.release(r);
    }

    #[test]
    fn test_next_and_previous_round_trip() {
        let mut tree = numbered(2, 3);
        expand_path(&mut tree, &[0]);
        expand_path(&mut tree, &[0, 2]);
        let total = tree.total_rows();

        let mut cursor = tree.create_node_reference(0).unwrap();
        let mut visited = 1;
        while tree.move_to_next(&mut cursor) {
            assert_eq!(tree.flat_index(&cursor).unwrap().index, visited);
            visited += 1;
        }
        assert_eq!(visited, total);

        let mut index = total - 1;
        while tree.move_to_previous(&mut cursor) {
            index -= 1;
            assert_eq!(tree.flat_index(&cursor).unwrap().index, index);
        }
        assert_eq!(index, 0);
        tree.release(cursor);

        // Only expanded nodes stay materialized after the scan.
        assert_eq!(tree.live_nodes(), 3);
    }

    #[test]
    fn test_parent_and_child_moves() {
        let mut tree = numbered(2, 2);
        let mut cursor = tree.create_node_reference(1).unwrap();
        assert!(!tree.move_to_parent(&mut cursor));
        assert!(tree.move_to_child(&mut cursor, 1));
        assert_eq!(tree.item(cursor.id()), Some(&vec![1, 1]));
        assert!(!tree.move_to_child(&mut cursor, 5));
        assert!(tree.move_to_parent(&mut cursor));
        assert_eq!(tree.item(cursor.id()), Some(&vec![1]));
        tree.release(cursor);
        assert_eq!(tree.live_nodes(), 1);
    }

    #[test]
    fn test_invalidated_reference_does_not_move() {
        let mut tree = numbered(3, 2);
        let mut cursor = tree.create_node_reference(1).unwrap();
        let root = tree.root();
        tree.refresh_items(root, vec![vec![0], vec![2]]);
        assert!(!tree.move_to_next(&mut cursor));
        assert!(!tree.move_to_previous(&mut cursor));
        assert!(tree.flat_index(&cursor).is_none());
        tree.release(cursor);
    }
}
