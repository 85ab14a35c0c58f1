//! Bounded pool of materialized rows keyed by node identity.
//!
//! Rows are expensive to build (content creation, binding, measuring), so
//! the grid keeps a pool of them larger than the viewport and recycles
//! the least recently used ones. Small scrolls then find most rows
//! already bound to the right node.

use std::collections::HashMap;

use crate::domain::{NodeId, NodeRef, NodeTree};
use crate::traits::{ItemSource, RowBinding, RowMetrics, RowPresenter};

/// Per-row flags derived from the selection model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowState {
    pub is_current: bool,
    pub is_selected: bool,
}

/// A materialized row bound to one node.
pub struct Row<C> {
    /// The row's own reference. Never the caller's transient cursor.
    node: NodeRef,
    content: C,
    state: RowState,
    is_expanded: bool,
    layout_pass: u64,
    metrics: RowMetrics,
    top: f32,
    visible: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<C> Row<C> {
    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn metrics(&self) -> RowMetrics {
        self.metrics
    }

    pub fn height(&self) -> f32 {
        self.metrics.height
    }

    /// Offset from the top of the viewport, valid while visible.
    pub fn top(&self) -> f32 {
        self.top
    }

    /// Whether the row took part in the latest layout pass. Hidden rows
    /// stay allocated, parked off the drawing surface.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_current(&self) -> bool {
        self.state.is_current
    }

    pub fn is_selected(&self) -> bool {
        self.state.is_selected
    }

    pub fn layout_pass(&self) -> u64 {
        self.layout_pass
    }
}

/// Counters for how rows were obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Row already bound to the requested node.
    pub hits: u64,
    /// Least recently used row rebound to a new node.
    pub rebinds: u64,
    /// New row allocated.
    pub grows: u64,
}

/// LRU row pool.
///
/// Rows live in a slab; an intrusive doubly linked list orders them by
/// recency (head = most recent) and a map finds a node's row.
pub struct RowCache<C> {
    rows: Vec<Option<Row<C>>>,
    free: Vec<usize>,
    by_node: HashMap<NodeId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
    stats: CacheStats,
}

impl<C> Default for RowCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RowCache<C> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            free: Vec::new(),
            by_node: HashMap::new(),
            head: None,
            tail: None,
            capacity: 0,
            stats: CacheStats::default(),
        }
    }

    // ===== Queries =====

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn row(&self, slot: usize) -> Option<&Row<C>> {
        self.rows.get(slot).and_then(Option::as_ref)
    }

    fn row_mut(&mut self, slot: usize) -> Option<&mut Row<C>> {
        self.rows.get_mut(slot).and_then(Option::as_mut)
    }

    /// Slot of the row bound to `id`, if any.
    pub fn slot_for(&self, id: NodeId) -> Option<usize> {
        self.by_node.get(&id).copied()
    }

    /// Rows in recency order, most recent first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &Row<C>> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let row = self.row(cursor?)?;
            cursor = row.next;
            Some(row)
        })
    }

    // ===== Recency List =====

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.row(slot).map(|row| (row.prev, row.next)) else {
            return;
        };
        match prev {
            Some(prev) => {
                if let Some(row) = self.row_mut(prev) {
                    row.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(row) = self.row_mut(next) {
                    row.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(row) = self.row_mut(slot) {
            row.prev = None;
            row.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(row) = self.row_mut(slot) {
            row.prev = None;
            row.next = old_head;
        }
        if let Some(head) = old_head {
            if let Some(row) = self.row_mut(head) {
                row.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    // ===== Row Lookup =====

    /// Returns the slot of a row bound to `node`, reusing, recycling or
    /// allocating one in that order of preference.
    ///
    /// # Arguments
    /// * `tree` - Tree owning `node`; the row takes its own reference
    /// * `presenter` - Creates, binds and measures row content
    /// * `node` - Node that needs a row (may be a moving cursor)
    /// * `state` - Current/selected flags for the row
    /// * `pass` - Current layout pass generation
    /// * `remeasure` - Re-measure even on a cache hit (full pass)
    pub fn get_row<S, P>(
        &mut self,
        tree: &mut NodeTree<S>,
        presenter: &mut P,
        node: &NodeRef,
        state: RowState,
        pass: u64,
        remeasure: bool,
    ) -> usize
    where
        S: ItemSource,
        P: RowPresenter<S::Item, Content = C>,
    {
        let id = node.id();
        if let Some(slot) = self.slot_for(id) {
            self.stats.hits += 1;
            self.touch(slot);
            let expanded = tree.is_expanded(id);
            let stale = match self.row_mut(slot) {
                Some(row) => {
                    row.layout_pass = pass;
                    row.state != state || row.is_expanded != expanded
                }
                None => false,
            };
            if stale || remeasure {
                self.bind(tree, presenter, slot, state, remeasure);
            }
            return slot;
        }

        let recyclable = self
            .tail
            .filter(|_| self.len() >= self.capacity)
            .filter(|&tail| self.row(tail).is_some_and(|row| row.layout_pass != pass));

        let slot = match recyclable {
            Some(slot) => {
                self.stats.rebinds += 1;
                let fresh = tree.clone_ref(node);
                let Some(row) = self.row_mut(slot) else {
                    tree.release(fresh);
                    return slot;
                };
                let old = std::mem::replace(&mut row.node, fresh);
                self.by_node.remove(&old.id());
                log::trace!("row {slot} rebound from {:?} to {:?}", old.id(), id);
                tree.release(old);
                self.touch(slot);
                slot
            }
            None => {
                if self.len() >= self.capacity {
                    log::warn!(
                        "row cache over capacity ({} rows, capacity {}): every row is in use this pass",
                        self.len(),
                        self.capacity
                    );
                }
                self.stats.grows += 1;
                let row = Row {
                    node: tree.clone_ref(node),
                    content: presenter.create(),
                    state,
                    is_expanded: false,
                    layout_pass: pass,
                    metrics: RowMetrics::default(),
                    top: 0.0,
                    visible: false,
                    prev: None,
                    next: None,
                };
                let slot = match self.free.pop() {
                    Some(slot) => {
                        self.rows[slot] = Some(row);
                        slot
                    }
                    None => {
                        self.rows.push(Some(row));
                        self.rows.len() - 1
                    }
                };
                self.push_front(slot);
                slot
            }
        };

        self.by_node.insert(id, slot);
        if let Some(row) = self.row_mut(slot) {
            row.layout_pass = pass;
        }
        self.bind(tree, presenter, slot, state, true);
        slot
    }

    fn bind<S, P>(&mut self, tree: &NodeTree<S>, presenter: &mut P, slot: usize, state: RowState, measure: bool)
    where
        S: ItemSource,
        P: RowPresenter<S::Item, Content = C>,
    {
        let Some(row) = self.rows.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        let id = row.node.id();
        let Some(item) = tree.item(id) else {
            return;
        };
        let binding = RowBinding {
            item,
            depth: tree.level(id).saturating_sub(1),
            is_expanded: tree.is_expanded(id),
            has_children: tree.has_children(id),
            is_current: state.is_current,
            is_selected: state.is_selected,
        };
        presenter.bind(&mut row.content, &binding);
        row.state = state;
        row.is_expanded = binding.is_expanded;
        if measure {
            row.metrics = presenter.measure(&row.content, &binding);
        }
    }

    // ===== Pass Bookkeeping =====

    /// Positions a row placed by the current pass.
    pub fn place(&mut self, slot: usize, top: f32) {
        if let Some(row) = self.row_mut(slot) {
            row.top = top;
            row.visible = true;
        }
    }

    /// Hides rows not placed in `pass` and drops surplus rows beyond the
    /// capacity, least recently used first.
    pub fn finish_pass<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, pass: u64, placed: &[usize]) {
        for row in self.rows.iter_mut().flatten() {
            row.visible = false;
        }
        for &slot in placed {
            if let Some(row) = self.row_mut(slot) {
                row.visible = true;
            }
        }
        while self.len() > self.capacity {
            match self.tail {
                Some(tail) if self.row(tail).is_some_and(|row| row.layout_pass != pass) => {
                    self.remove(tree, tail);
                }
                _ => break,
            }
        }
    }

    fn remove<S: ItemSource>(&mut self, tree: &mut NodeTree<S>, slot: usize) {
        self.unlink(slot);
        if let Some(row) = self.rows.get_mut(slot).and_then(Option::take) {
            self.by_node.remove(&row.node.id());
            tree.release(row.node);
            self.free.push(slot);
        }
    }

    /// Sets the capacity for the next pass. Shrinking takes effect at the
    /// end of that pass so rows still on screen are not destroyed early.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity != self.capacity {
            log::debug!("row cache capacity {} -> {}", self.capacity, capacity);
            self.capacity = capacity;
        }
    }

    /// Records a new measured height for `id`'s row.
    ///
    /// # Returns
    /// The pass the row was last used in if its height changed.
    pub fn update_height(&mut self, id: NodeId, height: f32) -> Option<u64> {
        let slot = self.slot_for(id)?;
        let row = self.row_mut(slot)?;
        if row.metrics.height == height {
            return None;
        }
        row.metrics.height = height;
        Some(row.layout_pass)
    }

    /// Largest measured width among cached rows.
    pub fn max_width(&self) -> f32 {
        self.rows
            .iter()
            .flatten()
            .filter(|row| row.visible)
            .map(|row| row.metrics.width)
            .fold(0.0, f32::max)
    }

    /// Rebinds visible rows whose current/selected flags changed since
    /// they were placed. Sizes are kept, so the placements stay valid.
    ///
    /// # Returns
    /// Number of rows rebound.
    pub fn restate<S, P, F>(&mut self, tree: &NodeTree<S>, presenter: &mut P, row_state: F) -> usize
    where
        S: ItemSource,
        P: RowPresenter<S::Item, Content = C>,
        F: Fn(NodeId) -> RowState,
    {
        let stale: Vec<(usize, RowState)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(slot, row)| {
                let row = row.as_ref().filter(|row| row.visible)?;
                let state = row_state(row.node.id());
                (row.state != state).then_some((slot, state))
            })
            .collect();
        let rebound = stale.len();
        for (slot, state) in stale {
            self.bind(tree, presenter, slot, state, false);
        }
        rebound
    }

    /// Drops rows bound to nodes that a refresh invalidated.
    ///
    /// # Returns
    /// Number of rows dropped.
    pub fn retain_valid<S: ItemSource>(&mut self, tree: &mut NodeTree<S>) -> usize {
        let stale: Vec<usize> = self
            .by_node
            .iter()
            .filter(|(&id, _)| !tree.is_valid(id))
            .map(|(_, &slot)| slot)
            .collect();
        let dropped = stale.len();
        for slot in stale {
            self.remove(tree, slot);
        }
        if dropped > 0 {
            log::debug!("dropped {dropped} rows bound to invalidated nodes");
        }
        dropped
    }

    /// Releases every row back to the tree.
    pub fn clear<S: ItemSource>(&mut self, tree: &mut NodeTree<S>) {
        for row in self.rows.drain(..).flatten() {
            tree.release(row.node);
        }
        self.free.clear();
        self.by_node.clear();
        self.head = None;
        self.tail = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{FixedHeightPresenter, FnSource};

    fn flat_tree(count: u32) -> NodeTree<FnSource<u32>> {
        NodeTree::new(FnSource::flat((0..count).collect()))
    }

    fn fetch(
        cache: &mut RowCache<()>,
        tree: &mut NodeTree<FnSource<u32>>,
        presenter: &mut FixedHeightPresenter,
        index: usize,
        pass: u64,
    ) -> usize {
        let r = tree.create_node_reference(index).unwrap();
        let slot = cache.get_row(tree, presenter, &r, RowState::default(), pass, false);
        tree.release(r);
        slot
    }

    #[test]
    fn test_hit_reuses_row() {
        let mut tree = flat_tree(10);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(4);

        let first = fetch(&mut cache, &mut tree, &mut presenter, 3, 1);
        let second = fetch(&mut cache, &mut tree, &mut presenter, 3, 2);
        assert_eq!(first, second);
        assert_eq!(cache.stats(), CacheStats { hits: 1, rebinds: 0, grows: 1 });
        assert_eq!(cache.row(first).unwrap().height(), 20.0);
    }

    #[test]
    fn test_row_keeps_node_alive() {
        let mut tree = flat_tree(10);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(4);

        fetch(&mut cache, &mut tree, &mut presenter, 5, 1);
        assert!(tree.existing_child(tree.root(), 5).is_some());
        cache.clear(&mut tree);
        assert!(tree.existing_child(tree.root(), 5).is_none());
    }

    #[test]
    fn test_evicts_least_recently_used_from_older_pass() {
        let mut tree = flat_tree(10);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(2);

        let zero = fetch(&mut cache, &mut tree, &mut presenter, 0, 1);
        fetch(&mut cache, &mut tree, &mut presenter, 1, 1);
        let reused = fetch(&mut cache, &mut tree, &mut presenter, 2, 2);

        assert_eq!(reused, zero);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().rebinds, 1);
        assert!(cache.slot_for(tree.existing_child(tree.root(), 2).unwrap()).is_some());
        // Row 0's node went away with its last reference.
        assert!(tree.existing_child(tree.root(), 0).is_none());
    }

    #[test]
    fn test_rows_of_current_pass_are_not_evicted() {
        let mut tree = flat_tree(10);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(2);

        for index in 0..3 {
            fetch(&mut cache, &mut tree, &mut presenter, index, 7);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().rebinds, 0);

        // The next pass trims back to capacity.
        let slot = fetch(&mut cache, &mut tree, &mut presenter, 2, 8);
        cache.finish_pass(&mut tree, 8, &[slot]);
        assert_eq!(cache.len(), 2);
        assert!(cache.row(slot).unwrap().is_visible());
    }

    #[test]
    fn test_recency_order() {
        let mut tree = flat_tree(10);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(8);

        for index in [0, 1, 2] {
            fetch(&mut cache, &mut tree, &mut presenter, index, 1);
        }
        fetch(&mut cache, &mut tree, &mut presenter, 0, 2);
        let order: Vec<u32> = cache
            .iter_recent()
            .map(|row| *tree.item(row.node_id()).unwrap())
            .collect();
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn test_restate_rebinds_only_changed_visible_rows() {
        let mut tree = flat_tree(10);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(8);
        let slots: Vec<usize> = (0..3).map(|i| fetch(&mut cache, &mut tree, &mut presenter, i, 1)).collect();
        for (n, &slot) in slots.iter().enumerate() {
            cache.place(slot, n as f32 * 20.0);
        }
        cache.finish_pass(&mut tree, 1, &slots);

        let current = cache.row(slots[1]).unwrap().node_id();
        let rebound = cache.restate(&tree, &mut presenter, |id| RowState {
            is_current: id == current,
            is_selected: id == current,
        });
        assert_eq!(rebound, 1);
        assert!(cache.row(slots[1]).unwrap().is_current());
        assert!(cache.row(slots[1]).unwrap().is_selected());
        assert!(!cache.row(slots[0]).unwrap().is_current());
        assert_eq!(cache.row(slots[1]).unwrap().height(), 20.0);
        assert_eq!(cache.stats().rebinds, 0);
    }

    #[test]
    fn test_height_update_reports_pass() {
        let mut tree = flat_tree(3);
        let mut presenter = FixedHeightPresenter::new(20.0);
        let mut cache = RowCache::new();
        cache.set_capacity(4);

        fetch(&mut cache, &mut tree, &mut presenter, 1, 5);
        let id = tree.existing_child(tree.root(), 1).unwrap();
        assert_eq!(cache.update_height(id, 20.0), None);
        assert_eq!(cache.update_height(id, 40.0), Some(5));
    }
}
