//! Selected set and current row.
//!
//! The model owns a reference for every selected node and for the current
//! node, which keeps those nodes materialized while they scroll out of
//! view. Change notifications are coalesced: every mutation runs inside a
//! nestable suppression scope and the events fire once, when the outermost
//! scope closes.

use std::collections::HashMap;

use crate::cache::RowState;
use crate::domain::{NodeId, NodeRef, NodeTree};
use crate::events::{EventQueue, GridEvent};
use crate::traits::ItemSource;

/// How a click or navigation affects the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectMode {
    /// Replace the selection with the target.
    #[default]
    Single,
    /// Add the target to the selection.
    Add,
    /// Flip the target's membership.
    Toggle,
    /// Select the range between the anchor and the target.
    Extend,
    /// Move the current row only.
    Move,
}

/// State related to the selected nodes and the current node.
///
/// Responsibilities:
/// - Owning references to selected nodes (keyed by node id)
/// - Tracking the current node and the range anchor
/// - Coalescing change notifications
#[derive(Debug, Default)]
pub struct SelectionModel {
    /// Keyed by id; the value is the reference the model owns.
    selected: HashMap<NodeId, NodeRef>,
    current: Option<NodeRef>,
    /// Flat index range extension starts from.
    anchor: Option<usize>,
    suppress_depth: usize,
    selection_dirty: bool,
    current_dirty: bool,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Queries =====

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.selected.contains_key(&id)
    }

    pub fn current(&self) -> Option<&NodeRef> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<NodeId> {
        self.current.as_ref().map(NodeRef::id)
    }

    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    /// Flags a row bound to `id` should display.
    pub fn row_state(&self, id: NodeId) -> RowState {
        RowState {
            is_current: self.current_id() == Some(id),
            is_selected: self.is_selected(id),
        }
    }

    /// Ids of the selected nodes, in no particular order.
    pub fn selected_ids(&self) -> Vec<NodeId> {
        self.selected.keys().copied().collect()
    }

    /// Owned clones of the selected references, ordered by flat index.
    /// Invalidated nodes have no index and come last.
    ///
    /// The caller must release every returned reference.
    pub fn selected_refs<S: ItemSource>(&self, tree: &mut NodeTree<S>) -> Vec<NodeRef> {
        let mut keyed: Vec<(Option<usize>, NodeId)> = self
            .selected
            .keys()
            .map(|&id| (tree.try_get_flat_index(id).map(|f| f.index), id))
            .collect();
        keyed.sort_by_key(|&(index, id)| (index.is_none(), index, id));
        let mut refs = Vec::with_capacity(keyed.len());
        for (_, id) in keyed {
            if let Some(owned) = self.selected.get(&id) {
                refs.push(tree.clone_ref(owned));
            }
        }
        refs
    }

    // ===== Suppression =====

    /// Opens a suppression scope. Scopes nest.
    pub fn begin_suppress(&mut self) {
        self.suppress_depth += 1;
    }

    /// Closes a suppression scope, firing pending notifications when the
    /// outermost one closes.
    pub fn end_suppress<S: ItemSource>(&mut self, tree: &NodeTree<S>, events: &mut EventQueue) {
        debug_assert!(self.suppress_depth > 0, "unbalanced end_suppress");
        self.suppress_depth = self.suppress_depth.saturating_sub(1);
        if self.suppress_depth > 0 {
            return;
        }
        if self.current_dirty {
            self.current_dirty = false;
            let index = self
                .current
                .as_ref()
                .and_then(|current| tree.flat_index(current))
                .map(|f| f.index);
            events.push(GridEvent::CurrentChanged { index });
        }
        if self.selection_dirty {
            self.selection_dirty = false;
            events.push(GridEvent::SelectionChanged { selected: self.selected.len() });
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppress_depth > 0
    }

    // ===== Raw Mutations =====

    fn insert<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, node: &NodeRef) {
        if !self.selected.contains_key(&node.id()) {
            self.selected.insert(node.id(), tree.clone_ref(node));
            self.selection_dirty = true;
        }
    }

    fn remove_id<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, id: NodeId) {
        if let Some(owned) = self.selected.remove(&id) {
            tree.release(owned);
            self.selection_dirty = true;
        }
    }

    fn clear_selected<S: ItemSource>(&mut self, tree: &mut NodeTree<S>) {
        if self.selected.is_empty() {
            return;
        }
        for (_, owned) in self.selected.drain() {
            tree.release(owned);
        }
        self.selection_dirty = true;
    }

    /// Flat index of a node whose row is currently exposed.
    fn exposed_index<S: ItemSource>(tree: &NodeTree<S>, node: &NodeRef) -> Option<usize> {
        tree.flat_index(node).filter(|f| f.fully_visible).map(|f| f.index)
    }

    // ===== Selection Operations =====

    /// Selects only `node` and makes it the anchor.
    ///
    /// # Returns
    /// `false` if the node has no exposed row.
    pub fn select_one<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue, node: &NodeRef) -> bool {
        let Some(index) = Self::exposed_index(tree, node) else {
            return false;
        };
        self.begin_suppress();
        let already_only = self.selected.len() == 1 && self.is_selected(node.id());
        if !already_only {
            self.clear_selected(tree);
            self.insert(tree, node);
        }
        self.anchor = Some(index);
        self.end_suppress(tree, events);
        true
    }

    /// Adds `node` to the selection.
    pub fn add<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue, node: &NodeRef) -> bool {
        let Some(index) = Self::exposed_index(tree, node) else {
            return false;
        };
        self.begin_suppress();
        self.insert(tree, node);
        self.anchor.get_or_insert(index);
        self.end_suppress(tree, events);
        true
    }

    /// Adds `node` if unselected, removes it otherwise.
    pub fn toggle<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue, node: &NodeRef) -> bool {
        let Some(index) = Self::exposed_index(tree, node) else {
            return false;
        };
        self.begin_suppress();
        if self.is_selected(node.id()) {
            self.remove_id(tree, node.id());
        } else {
            self.insert(tree, node);
        }
        self.anchor.get_or_insert(index);
        self.end_suppress(tree, events);
        true
    }

    /// Replaces the selection with the rows between the anchor and `node`,
    /// both included. Without an anchor, `node` becomes the anchor.
    pub fn extend_to<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue, node: &NodeRef) -> bool {
        let Some(target) = Self::exposed_index(tree, node) else {
            return false;
        };
        let last = tree.total_rows().saturating_sub(1);
        let anchor = self.anchor.map_or(target, |anchor| anchor.min(last));
        self.anchor = Some(anchor);
        let (lo, hi) = (anchor.min(target), anchor.max(target));

        self.begin_suppress();
        self.clear_selected(tree);
        if let Some(mut cursor) = tree.create_node_reference(lo) {
            self.insert(tree, &cursor);
            for _ in lo..hi {
                if !tree.move_to_next(&mut cursor) {
                    break;
                }
                self.insert(tree, &cursor);
            }
            tree.release(cursor);
        }
        self.end_suppress(tree, events);
        true
    }

    /// Deselects `node`.
    pub fn remove<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue, node: &NodeRef) {
        self.begin_suppress();
        self.remove_id(tree, node.id());
        self.end_suppress(tree, events);
    }

    /// Deselects everything.
    pub fn clear<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue) {
        self.begin_suppress();
        self.clear_selected(tree);
        self.anchor = None;
        self.end_suppress(tree, events);
    }

    /// Applies `mode` to `node`. `Move` leaves the selection alone.
    pub fn apply<S: ItemSource>(
        &mut self,
        tree: &mut NodeTree<S>,
        events: &mut EventQueue,
        node: &NodeRef,
        mode: SelectMode,
    ) -> bool {
        match mode {
            SelectMode::Single => self.select_one(tree, events, node),
            SelectMode::Add => self.add(tree, events, node),
            SelectMode::Toggle => self.toggle(tree, events, node),
            SelectMode::Extend => self.extend_to(tree, events, node),
            SelectMode::Move => Self::exposed_index(tree, node).is_some(),
        }
    }

    // ===== Current Node =====

    /// Makes `node` the current node, or clears it with `None`.
    pub fn set_current<S: ItemSource>(
        &mut self,
        tree: &mut NodeTree<S>,
        events: &mut EventQueue,
        node: Option<&NodeRef>,
    ) {
        if self.current_id() == node.map(NodeRef::id) {
            return;
        }
        self.begin_suppress();
        let fresh = node.map(|node| tree.clone_ref(node));
        if let Some(old) = std::mem::replace(&mut self.current, fresh) {
            tree.release(old);
        }
        self.current_dirty = true;
        self.end_suppress(tree, events);
    }

    // ===== Maintenance =====

    /// Drops references to nodes invalidated by a refresh and re-anchors
    /// on the current row.
    pub fn prune_invalid<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue) {
        self.begin_suppress();
        let stale: Vec<NodeId> = self
            .selected
            .keys()
            .copied()
            .filter(|&id| !tree.is_valid(id))
            .collect();
        for id in stale {
            self.remove_id(tree, id);
        }
        if self.current_id().is_some_and(|id| !tree.is_valid(id)) {
            if let Some(old) = self.current.take() {
                tree.release(old);
            }
            self.current_dirty = true;
        }
        self.anchor = self
            .current
            .as_ref()
            .and_then(|current| Self::exposed_index(tree, current));
        self.end_suppress(tree, events);
    }

    /// Releases every reference the model owns.
    pub fn release_all<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, events: &mut EventQueue) {
        self.begin_suppress();
        self.clear_selected(tree);
        if let Some(old) = self.current.take() {
            tree.release(old);
            self.current_dirty = true;
        }
        self.anchor = None;
        self.end_suppress(tree, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FnSource;

    fn flat_tree(count: u32) -> NodeTree<FnSource<u32>> {
        NodeTree::new(FnSource::flat((0..count).collect()))
    }

    fn at(tree: &mut NodeTree<FnSource<u32>>, index: usize) -> NodeRef {
        tree.create_node_reference(index).unwrap()
    }

    fn selected_items(model: &SelectionModel, tree: &mut NodeTree<FnSource<u32>>) -> Vec<u32> {
        let refs = model.selected_refs(tree);
        let items = refs.iter().map(|r| *tree.item(r.id()).unwrap()).collect();
        for r in refs {
            tree.release(r);
        }
        items
    }

    #[test]
    fn test_select_one_replaces() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 2);
        let b = at(&mut tree, 5);

        assert!(model.select_one(&mut tree, &mut events, &a));
        assert!(model.select_one(&mut tree, &mut events, &b));
        assert_eq!(selected_items(&model, &mut tree), vec![5]);
        assert_eq!(model.anchor(), Some(5));
        assert_eq!(events.drain().len(), 2);

        tree.release(a);
        tree.release(b);
    }

    #[test]
    fn test_selection_keeps_nodes_alive() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 3);
        let id = a.id();
        model.select_one(&mut tree, &mut events, &a);
        tree.release(a);
        assert!(tree.node(id).is_some());

        model.clear(&mut tree, &mut events);
        assert!(tree.node(id).is_none());
        assert_eq!(tree.live_nodes(), 1);
    }

    #[test]
    fn test_add_and_toggle_set_anchor_once() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 1);
        let b = at(&mut tree, 4);

        model.add(&mut tree, &mut events, &a);
        model.toggle(&mut tree, &mut events, &b);
        assert_eq!(model.anchor(), Some(1));
        assert_eq!(selected_items(&model, &mut tree), vec![1, 4]);

        model.toggle(&mut tree, &mut events, &a);
        assert_eq!(selected_items(&model, &mut tree), vec![4]);

        tree.release(a);
        tree.release(b);
    }

    #[test]
    fn test_extend_selects_range_from_anchor() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 6);
        let b = at(&mut tree, 3);

        model.select_one(&mut tree, &mut events, &a);
        events.drain();
        model.extend_to(&mut tree, &mut events, &b);
        assert_eq!(selected_items(&model, &mut tree), vec![3, 4, 5, 6]);
        assert_eq!(model.anchor(), Some(6));
        assert_eq!(events.drain(), vec![GridEvent::SelectionChanged { selected: 4 }]);

        tree.release(a);
        tree.release(b);
    }

    #[test]
    fn test_extend_without_anchor_selects_target() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 2);
        model.extend_to(&mut tree, &mut events, &a);
        assert_eq!(model.anchor(), Some(2));
        assert_eq!(model.len(), 1);
        tree.release(a);
    }

    #[test]
    fn test_nested_scopes_fire_once() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let refs: Vec<NodeRef> = (0..5).map(|i| at(&mut tree, i)).collect();

        model.begin_suppress();
        for r in &refs {
            model.add(&mut tree, &mut events, r);
        }
        assert!(events.is_empty());
        model.end_suppress(&tree, &mut events);
        assert_eq!(events.drain(), vec![GridEvent::SelectionChanged { selected: 5 }]);

        for r in refs {
            tree.release(r);
        }
    }

    #[test]
    fn test_current_changes_are_reported() {
        let mut tree = flat_tree(10);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 7);
        model.set_current(&mut tree, &mut events, Some(&a));
        model.set_current(&mut tree, &mut events, Some(&a));
        assert_eq!(events.drain(), vec![GridEvent::CurrentChanged { index: Some(7) }]);
        assert!(model.row_state(a.id()).is_current);
        model.set_current(&mut tree, &mut events, None);
        assert_eq!(events.drain(), vec![GridEvent::CurrentChanged { index: None }]);
        tree.release(a);
    }

    #[test]
    fn test_prune_drops_invalidated_nodes() {
        let mut tree = flat_tree(4);
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let a = at(&mut tree, 1);
        let b = at(&mut tree, 2);
        model.add(&mut tree, &mut events, &a);
        model.add(&mut tree, &mut events, &b);
        model.set_current(&mut tree, &mut events, Some(&a));
        tree.release(a);
        tree.release(b);
        events.drain();

        let root = tree.root();
        tree.refresh_items(root, vec![0, 2, 3]);
        model.prune_invalid(&mut tree, &mut events);

        assert_eq!(selected_items(&model, &mut tree), vec![2]);
        assert!(model.current().is_none());
        assert_eq!(model.anchor(), None);
        assert_eq!(
            events.drain(),
            vec![
                GridEvent::CurrentChanged { index: None },
                GridEvent::SelectionChanged { selected: 1 },
            ]
        );
        model.release_all(&mut tree, &mut events);
        assert_eq!(tree.live_nodes(), 1);
    }

    #[test]
    fn test_hidden_rows_cannot_be_selected() {
        let mut tree = NodeTree::new(FnSource::new(
            vec![1u32],
            |&item: &u32| (item < 100).then(|| vec![item * 10, item * 10 + 1]),
            |&item: &u32| item < 100,
        ));
        let mut events = EventQueue::new();
        let mut model = SelectionModel::new();
        let mut cursor = at(&mut tree, 0);
        assert!(tree.move_to_child(&mut cursor, 0));
        assert!(!model.select_one(&mut tree, &mut events, &cursor));
        assert!(model.is_empty());
        tree.release(cursor);
    }
}
