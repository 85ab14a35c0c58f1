//! Lazily materialized tree over an external item source.
//!
//! The tree mirrors an [`ItemSource`] without ever copying the whole
//! hierarchy. A node only exists while something needs it: a live
//! [`NodeRef`], an expanded flag, or a materialized child underneath it.
//! Everything else is represented implicitly by the parent's item list.
//!
//! Each node tracks `flat_count`, the number of rows its subtree adds to
//! the flattened sequence (not counting its own row):
//!
//! ```text
//! flat_count == item_count + sum(child.flat_count for expanded children)
//! ```
//!
//! All index arithmetic in [`crate::domain::flat_index`] relies on that
//! invariant, so every mutation below keeps it and pushes the resulting
//! delta upward exactly once.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::domain::node_ref::NodeRef;
use crate::traits::ItemSource;

/// Generational handle to a slot in the node arena.
///
/// Slots are recycled, so the generation guards against a stale handle
/// silently resolving to an unrelated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Root and child nodes differ only in where their items come from and
/// whether they report flat-count changes to a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Synthetic root holding the top-level item sequence.
    Root,
    /// Node bound to one item of its parent's item list.
    Child,
}

/// Change notification for one node's child item list.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemsChange<T> {
    /// `items` were inserted starting at `index`.
    Inserted { index: usize, items: Vec<T> },
    /// `count` items were removed starting at `index`.
    Removed { index: usize, count: usize },
    /// The whole list changed; re-query the source.
    Reset,
}

/// One materialized position in the hierarchy.
#[derive(Debug)]
pub struct TreeNode<T> {
    pub(crate) kind: NodeKind,
    /// Non-owning back reference. `None` for the root and for detached nodes.
    pub(crate) parent: Option<NodeId>,
    /// Position in the parent's item list; `None` once invalidated.
    pub(crate) child_index: Option<usize>,
    pub(crate) level: usize,
    pub(crate) is_expanded: bool,
    pub(crate) flat_count: usize,
    pub(crate) ref_count: usize,
    /// `None` until the children function has been called.
    pub(crate) items: Option<Vec<T>>,
    /// Sparse map from item index to the materialized child.
    pub(crate) children: BTreeMap<usize, NodeId>,
}

impl<T> TreeNode<T> {
    fn new_child(parent: NodeId, child_index: usize, level: usize) -> Self {
        Self {
            kind: NodeKind::Child,
            parent: Some(parent),
            child_index: Some(child_index),
            level,
            is_expanded: false,
            flat_count: 0,
            ref_count: 0,
            items: None,
            children: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Position within the parent's item list, or `None` if invalidated.
    pub fn child_index(&self) -> Option<usize> {
        self.child_index
    }

    /// Depth in the tree; the synthetic root is level 0.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    /// Rows contributed by this node's subtree, excluding its own row.
    pub fn flat_count(&self) -> usize {
        self.flat_count
    }

    /// Number of live [`NodeRef`]s pointing at this node.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Number of loaded child items, 0 if not loaded yet.
    pub fn item_count(&self) -> usize {
        self.items.as_ref().map_or(0, Vec::len)
    }

    pub fn items_loaded(&self) -> bool {
        self.items.is_some()
    }

    /// Number of materialized children.
    pub fn materialized_children(&self) -> usize {
        self.children.len()
    }

    pub fn is_invalidated(&self) -> bool {
        self.kind == NodeKind::Child && self.child_index.is_none()
    }

    fn is_collectable(&self) -> bool {
        self.kind == NodeKind::Child
            && self.ref_count == 0
            && !self.is_expanded
            && self.children.is_empty()
    }
}

struct Slot<T> {
    generation: u32,
    node: Option<TreeNode<T>>,
}

/// Arena-backed lazy tree bound to an [`ItemSource`].
pub struct NodeTree<S: ItemSource> {
    pub(crate) source: S,
    slots: Vec<Slot<S::Item>>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
}

impl<S: ItemSource> NodeTree<S> {
    /// Creates a tree over `source` and loads the top-level items.
    pub fn new(source: S) -> Self {
        let root_node = TreeNode {
            kind: NodeKind::Root,
            parent: None,
            child_index: Some(0),
            level: 0,
            is_expanded: true,
            flat_count: 0,
            ref_count: 0,
            items: None,
            children: BTreeMap::new(),
        };
        let mut tree = Self {
            source,
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            live: 0,
        };
        tree.root = tree.alloc(root_node);
        tree.ensure_items(tree.root);
        tree
    }

    // ===== Arena =====

    fn alloc(&mut self, node: TreeNode<S::Item>) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId { index, generation: slot.generation };
        }
        self.slots.push(Slot { generation: 0, node: Some(node) });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn free_node(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.live -= 1;
            }
        }
    }

    /// Looks up a live node.
    pub fn node(&self, id: NodeId) -> Option<&TreeNode<S::Item>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode<S::Item>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    // ===== Queries =====

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of rows in the flattened sequence.
    pub fn total_rows(&self) -> usize {
        self.node(self.root).map_or(0, |root| root.flat_count)
    }

    /// Number of materialized nodes, root included.
    pub fn live_nodes(&self) -> usize {
        self.live
    }

    /// Returns the item a node is bound to. `None` for the root and for
    /// invalidated nodes.
    pub fn item(&self, id: NodeId) -> Option<&S::Item> {
        let node = self.node(id)?;
        let child_index = node.child_index?;
        let parent = self.node(node.parent?)?;
        parent.items.as_ref()?.get(child_index)
    }

    /// Materialized child at `item_index`, without creating it.
    pub fn existing_child(&self, parent: NodeId, item_index: usize) -> Option<NodeId> {
        self.node(parent)?.children.get(&item_index).copied()
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| node.is_expanded)
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| !node.is_invalidated())
    }

    pub fn level(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, |node| node.level)
    }

    /// Whether the node has children, without loading them when possible.
    pub fn has_children(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) if node.items.is_some() => node.item_count() > 0,
            Some(_) => self.item(id).is_some_and(|item| self.source.has_children(item)),
            None => false,
        }
    }

    // ===== Item Loading =====

    /// Loads a node's child items from the source if not loaded yet.
    ///
    /// The root takes the top-level sequence; child nodes call the
    /// children function on their bound item. A `None` result counts as
    /// an empty list.
    pub fn ensure_items(&mut self, id: NodeId) {
        let kind = match self.node(id) {
            Some(node) if node.items.is_none() && !node.is_invalidated() => node.kind,
            _ => return,
        };
        let items = match kind {
            NodeKind::Root => self.source.top_level(),
            NodeKind::Child => match self.item(id) {
                Some(item) => self.source.children(item).unwrap_or_default(),
                None => return,
            },
        };
        let count = items.len();
        if let Some(node) = self.node_mut(id) {
            debug_assert!(node.children.is_empty());
            node.items = Some(items);
        }
        self.adjust_flat_count(id, count as isize);
    }

    /// Returns the child at `item_index`, creating it on first use.
    ///
    /// A freshly created node has no references and is collapsed, so the
    /// caller must acquire or expand it before handing control back.
    pub fn get_or_create_child(&mut self, parent: NodeId, item_index: usize) -> Option<NodeId> {
        self.ensure_items(parent);
        let node = self.node(parent)?;
        if node.is_invalidated() {
            return None;
        }
        if item_index >= node.item_count() {
            debug_assert!(false, "child index {item_index} out of range");
            return None;
        }
        if let Some(&existing) = node.children.get(&item_index) {
            return Some(existing);
        }
        let level = node.level + 1;
        let child = self.alloc(TreeNode::new_child(parent, item_index, level));
        if let Some(node) = self.node_mut(parent) {
            node.children.insert(item_index, child);
        }
        Some(child)
    }

    // ===== Flat Count Bookkeeping =====

    /// Applies `delta` to a node's flat count and forwards it upward
    /// while the chain of ancestors stays expanded.
    pub(crate) fn adjust_flat_count(&mut self, id: NodeId, delta: isize) {
        if delta == 0 {
            return;
        }
        let mut current = id;
        while let Some(node) = self.node_mut(current) {
            node.flat_count = node.flat_count.saturating_add_signed(delta);
            if node.kind == NodeKind::Root || !node.is_expanded || node.child_index.is_none() {
                break;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    /// Forwards a node's own flat-count change to its parent, honoring the
    /// node's expansion state.
    fn propagate_above(&mut self, id: NodeId, delta: isize) {
        let parent = match self.node(id) {
            Some(node) if node.kind == NodeKind::Child && node.is_expanded => node.parent,
            _ => None,
        };
        if let Some(parent) = parent {
            self.adjust_flat_count(parent, delta);
        }
    }

    // ===== Expansion =====

    /// Expands or collapses a node, updating the parent's flat count.
    ///
    /// Collapsing a node nobody references and that has no materialized
    /// children releases it.
    ///
    /// # Returns
    /// `true` if the expansion state changed.
    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> bool {
        match self.node(id) {
            Some(node)
                if node.kind == NodeKind::Child
                    && !node.is_invalidated()
                    && node.is_expanded != expanded => {}
            _ => return false,
        }
        if expanded {
            self.ensure_items(id);
        }
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        node.is_expanded = expanded;
        let subtree = node.flat_count as isize;
        let parent = node.parent;
        if let Some(parent) = parent {
            self.adjust_flat_count(parent, if expanded { subtree } else { -subtree });
        }
        if !expanded {
            self.collect_if_unreachable(id);
        }
        true
    }

    /// Flips a node's expansion state.
    pub fn toggle_expansion(&mut self, id: NodeId) -> bool {
        let expanded = self.is_expanded(id);
        self.set_expanded(id, !expanded)
    }

    // ===== Reference Counting =====

    pub(crate) fn acquire(&mut self, id: NodeId) -> NodeRef {
        if let Some(node) = self.node_mut(id) {
            node.ref_count += 1;
        } else {
            debug_assert!(false, "acquiring a reference to a dead node");
        }
        NodeRef::new(id)
    }

    /// Clones a reference, taking another share of the node's lifetime.
    pub fn clone_ref(&mut self, node: &NodeRef) -> NodeRef {
        self.acquire(node.id())
    }

    /// Releases a reference. Dropping the last share of a collapsed,
    /// childless node removes it, cascading up through emptied parents.
    pub fn release(&mut self, node: NodeRef) {
        let id = node.id();
        match self.node_mut(id) {
            Some(node) if node.ref_count > 0 => node.ref_count -= 1,
            _ => {
                debug_assert!(false, "releasing a reference that is not held");
                return;
            }
        }
        self.collect_if_unreachable(id);
    }

    /// Moves a reference to another node: acquires the new node first,
    /// then releases the old one.
    pub(crate) fn retarget(&mut self, node: &mut NodeRef, target: NodeId) {
        if node.id() == target {
            return;
        }
        let new_ref = self.acquire(target);
        let old = std::mem::replace(node, new_ref);
        self.release(old);
    }

    fn collect_if_unreachable(&mut self, id: NodeId) {
        let mut current = id;
        loop {
            let (parent, child_index) = match self.node(current) {
                Some(node) if node.is_collectable() => (node.parent, node.child_index),
                _ => return,
            };
            self.free_node(current);
            let (Some(parent), Some(child_index)) = (parent, child_index) else {
                return;
            };
            if let Some(node) = self.node_mut(parent) {
                node.children.remove(&child_index);
            }
            current = parent;
        }
    }

    /// Frees materialized children of `id` that nothing keeps alive any
    /// more. Does not cascade to `id` itself.
    fn prune_children(&mut self, id: NodeId) {
        let dead: Vec<(usize, NodeId)> = match self.node(id) {
            Some(node) => node
                .children
                .iter()
                .filter(|(_, &child)| self.node(child).is_some_and(TreeNode::is_collectable))
                .map(|(&index, &child)| (index, child))
                .collect(),
            None => return,
        };
        for (index, child) in dead {
            self.free_node(child);
            if let Some(node) = self.node_mut(id) {
                node.children.remove(&index);
            }
        }
    }

    /// Detaches a subtree from index arithmetic. Referenced nodes survive
    /// as orphans until their last reference is released.
    fn invalidate_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node_mut(current) else {
                continue;
            };
            node.child_index = None;
            node.parent = None;
            node.is_expanded = false;
            node.items = None;
            node.flat_count = 0;
            stack.extend(std::mem::take(&mut node.children).into_values());
            if node.ref_count == 0 {
                self.free_node(current);
            }
        }
    }

    // ===== Refresh =====

    /// Replaces a node's item list, keeping the state of children whose
    /// item is still present. Items are matched by equality, not by
    /// position; unmatched children are invalidated.
    pub fn refresh_items(&mut self, id: NodeId, new_items: Vec<S::Item>) {
        let delta = self.refresh_node(id, new_items, false);
        self.propagate_above(id, delta);
        self.collect_if_unreachable(id);
    }

    /// Swaps in a new source and re-matches every loaded node against it.
    /// Expansion state of surviving items is preserved.
    pub fn refresh_from_source(&mut self, source: S) {
        self.source = source;
        let top_level = self.source.top_level();
        let root = self.root;
        self.refresh_node(root, top_level, true);
    }

    /// Drops every node below the root and reloads the top level.
    pub fn reset(&mut self, source: S) {
        self.source = source;
        let root = self.root;
        let children = match self.node_mut(root) {
            Some(node) => {
                node.items = None;
                node.flat_count = 0;
                std::mem::take(&mut node.children)
            }
            None => return,
        };
        for child in children.into_values() {
            self.invalidate_subtree(child);
        }
        self.ensure_items(root);
        log::debug!("tree reset: {} top-level rows", self.total_rows());
    }

    /// Re-matches one node's children and returns its flat-count delta.
    /// Nothing is propagated upward; the caller emits the single delta.
    fn refresh_node(&mut self, id: NodeId, new_items: Vec<S::Item>, recurse: bool) -> isize {
        let (old_items, old_children, old_flat) = match self.node_mut(id) {
            Some(node) if !node.is_invalidated() => (
                node.items.take(),
                std::mem::take(&mut node.children),
                node.flat_count,
            ),
            _ => return 0,
        };
        let Some(old_items) = old_items else {
            debug_assert!(old_children.is_empty());
            let count = new_items.len();
            if let Some(node) = self.node_mut(id) {
                node.items = Some(new_items);
                node.flat_count = count;
            }
            return count as isize - old_flat as isize;
        };

        let mut positions: HashMap<&S::Item, VecDeque<usize>> = HashMap::new();
        for (index, item) in new_items.iter().enumerate() {
            positions.entry(item).or_default().push_back(index);
        }

        let mut matched = BTreeMap::new();
        let mut unmatched = Vec::new();
        for (old_index, child) in old_children {
            let new_index = old_items
                .get(old_index)
                .and_then(|item| positions.get_mut(item))
                .and_then(VecDeque::pop_front);
            match new_index {
                Some(new_index) => {
                    if let Some(node) = self.node_mut(child) {
                        node.child_index = Some(new_index);
                    }
                    matched.insert(new_index, child);
                }
                None => unmatched.push(child),
            }
        }
        drop(positions);

        let invalidated = unmatched.len();
        for child in unmatched {
            self.invalidate_subtree(child);
        }

        if recurse {
            for (&index, &child) in &matched {
                if !self.node(child).is_some_and(|node| node.items.is_some()) {
                    continue;
                }
                let grandchildren = self.source.children(&new_items[index]).unwrap_or_default();
                self.refresh_node(child, grandchildren, true);
            }
        }

        let expanded_rows: usize = matched
            .values()
            .filter_map(|&child| self.node(child))
            .filter(|node| node.is_expanded)
            .map(|node| node.flat_count)
            .sum();
        let new_flat = new_items.len() + expanded_rows;
        log::trace!(
            "refreshed node: {} items, {} children kept, {} invalidated",
            new_items.len(),
            matched.len(),
            invalidated
        );
        if let Some(node) = self.node_mut(id) {
            node.items = Some(new_items);
            node.children = matched;
            node.flat_count = new_flat;
        }
        // Children emptied by the recursion above are garbage now.
        self.prune_children(id);
        new_flat as isize - old_flat as isize
    }

    // ===== Collection Changes =====

    /// Applies an add/remove/reset notification for `id`'s item list.
    ///
    /// Unloaded lists are left alone; they will be read fresh on demand.
    pub fn apply_change(&mut self, id: NodeId, change: ItemsChange<S::Item>) {
        let len = match self.node(id) {
            Some(node) if node.items.is_some() && !node.is_invalidated() => node.item_count(),
            _ => return,
        };
        match change {
            ItemsChange::Inserted { index, items } => {
                if index > len {
                    debug_assert!(false, "insert index {index} out of range");
                    return;
                }
                let count = items.len();
                let shifted = self.shift_children(id, index, count as isize);
                if let Some(node) = self.node_mut(id) {
                    if let Some(list) = node.items.as_mut() {
                        list.splice(index..index, items);
                    }
                    node.children.extend(shifted);
                }
                self.adjust_flat_count(id, count as isize);
            }
            ItemsChange::Removed { index, count } => {
                if index.checked_add(count).map_or(true, |end| end > len) {
                    debug_assert!(false, "remove range {index}+{count} out of range");
                    return;
                }
                let removed: Vec<NodeId> = match self.node_mut(id) {
                    Some(node) => {
                        let mut tail = node.children.split_off(&index);
                        let rest = tail.split_off(&(index + count));
                        node.children.extend(rest);
                        tail.into_values().collect()
                    }
                    None => return,
                };
                let removed_rows: usize = removed
                    .iter()
                    .filter_map(|&child| self.node(child))
                    .filter(|node| node.is_expanded)
                    .map(|node| node.flat_count)
                    .sum();
                for child in removed {
                    self.invalidate_subtree(child);
                }
                let shifted = self.shift_children(id, index + count, -(count as isize));
                if let Some(node) = self.node_mut(id) {
                    if let Some(list) = node.items.as_mut() {
                        list.drain(index..index + count);
                    }
                    node.children.extend(shifted);
                }
                self.adjust_flat_count(id, -((count + removed_rows) as isize));
                self.collect_if_unreachable(id);
            }
            ItemsChange::Reset => {
                let items = match self.node(id).map(|node| node.kind) {
                    Some(NodeKind::Root) => self.source.top_level(),
                    Some(NodeKind::Child) => match self.item(id) {
                        Some(item) => self.source.children(item).unwrap_or_default(),
                        None => return,
                    },
                    None => return,
                };
                self.refresh_items(id, items);
            }
        }
    }

    /// Splits off children at or after `from` and re-keys them by `offset`.
    fn shift_children(&mut self, id: NodeId, from: usize, offset: isize) -> Vec<(usize, NodeId)> {
        let moved = match self.node_mut(id) {
            Some(node) => node.children.split_off(&from),
            None => return Vec::new(),
        };
        let mut shifted = Vec::with_capacity(moved.len());
        for (index, child) in moved {
            let new_index = index.saturating_add_signed(offset);
            if let Some(node) = self.node_mut(child) {
                node.child_index = Some(new_index);
            }
            shifted.push((new_index, child));
        }
        shifted
    }

    // ===== Verification =====

    /// Recomputes every flat count and checks it against the stored one.
    /// Also fails on nodes that should have been collected.
    ///
    /// Development aid; never called on hot paths.
    pub fn verify(&self) -> anyhow::Result<()> {
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(node) = slot.node.as_ref() else {
                continue;
            };
            if node.is_collectable() {
                anyhow::bail!("node {index}: unreferenced, collapsed and childless but still allocated");
            }
            if node.is_invalidated() {
                continue;
            }
            let expanded_rows: usize = node
                .children
                .values()
                .filter_map(|&child| self.node(child))
                .filter(|child| child.is_expanded)
                .map(|child| child.flat_count)
                .sum();
            let expected = node.item_count() + expanded_rows;
            if node.flat_count != expected {
                anyhow::bail!(
                    "node {index}: flat_count {} != {} items + {} expanded rows",
                    node.flat_count,
                    node.item_count(),
                    expanded_rows
                );
            }
            for (&child_index, &child) in &node.children {
                let Some(child_node) = self.node(child) else {
                    anyhow::bail!("node {index}: dangling child at {child_index}");
                };
                if child_node.child_index != Some(child_index) {
                    anyhow::bail!("node {index}: child keyed {child_index} reports {:?}", child_node.child_index);
                }
                if child_index >= node.item_count() {
                    anyhow::bail!("node {index}: child {child_index} beyond {} items", node.item_count());
                }
            }
        }
        Ok(())
    }
}
