//! Bulk expansion operations and expansion snapshots.

use std::collections::HashSet;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::domain::node_tree::{NodeId, NodeTree};
use crate::traits::ItemSource;

/// Set of expanded items, keyed by item identity.
///
/// Taken before a full data reload and replayed afterwards. Items are
/// kept in pre-order so restoring walks parents before children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionSnapshot<T> {
    expanded: Vec<T>,
}

impl<T> Default for ExpansionSnapshot<T> {
    fn default() -> Self {
        Self { expanded: Vec::new() }
    }
}

impl<T: Eq + Hash> ExpansionSnapshot<T> {
    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.expanded.contains(item)
    }

    pub fn items(&self) -> &[T] {
        &self.expanded
    }
}

impl<S: ItemSource> NodeTree<S> {
    /// Expands `id` and every descendant that has children, down to
    /// `max_depth` levels below `id` (`None` = unlimited; only safe for
    /// finite sources).
    pub fn expand_subtree(&mut self, id: NodeId, max_depth: Option<usize>) {
        let mut stack = vec![(id, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            if current != self.root() {
                self.set_expanded(current, true);
            }
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            self.ensure_items(current);
            let count = self.node(current).map_or(0, |node| node.item_count());
            for index in 0..count {
                let has_children = match self.existing_child(current, index) {
                    Some(child) => self.has_children(child),
                    None => self
                        .node(current)
                        .and_then(|node| node.items.as_ref())
                        .and_then(|items| items.get(index))
                        .is_some_and(|item| self.source.has_children(item)),
                };
                if !has_children {
                    continue;
                }
                if let Some(child) = self.get_or_create_child(current, index) {
                    stack.push((child, depth + 1));
                }
            }
        }
    }

    /// Collapses `id` and every expanded descendant.
    pub fn collapse_subtree(&mut self, id: NodeId) {
        // Children first, so releases cascade up through emptied parents.
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(node) = self.node(current) {
                stack.extend(
                    node.children
                        .values()
                        .copied()
                        .filter(|&child| self.is_expanded(child)),
                );
            }
        }
        for current in order.into_iter().rev() {
            if current != self.root() {
                self.set_expanded(current, false);
            }
        }
    }

    /// Expands every top-level item recursively.
    pub fn expand_all(&mut self, max_depth: Option<usize>) {
        let root = self.root();
        self.expand_subtree(root, max_depth);
    }

    pub fn collapse_all(&mut self) {
        let root = self.root();
        self.collapse_subtree(root);
    }

    /// Records the items of all expanded, reachable nodes.
    pub fn save_expansion(&self) -> ExpansionSnapshot<S::Item> {
        let mut expanded = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else {
                continue;
            };
            // Reverse so the stack pops children in ascending order.
            for &child in node.children.values().rev() {
                if !self.is_expanded(child) {
                    continue;
                }
                if let Some(item) = self.item(child) {
                    expanded.push(item.clone());
                }
                stack.push(child);
            }
        }
        ExpansionSnapshot { expanded }
    }

    /// Expands every item found in `snapshot`, starting from the top level
    /// and descending only into items that were expanded.
    ///
    /// # Returns
    /// Number of nodes expanded.
    pub fn restore_expansion(&mut self, snapshot: &ExpansionSnapshot<S::Item>) -> usize {
        if snapshot.is_empty() {
            return 0;
        }
        let wanted: HashSet<&S::Item> = snapshot.expanded.iter().collect();
        let mut restored = 0;
        let mut stack = vec![self.root()];
        while let Some(current) = stack.pop() {
            self.ensure_items(current);
            let matches: Vec<usize> = match self.node(current).and_then(|node| node.items.as_ref()) {
                Some(items) => items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| wanted.contains(item))
                    .map(|(index, _)| index)
                    .collect(),
                None => continue,
            };
            for index in matches {
                let Some(child) = self.get_or_create_child(current, index) else {
                    continue;
                };
                if self.set_expanded(child, true) {
                    restored += 1;
                }
                stack.push(child);
            }
        }
        log::debug!("restored {restored} of {} expanded items", snapshot.len());
        restored
    }
}
