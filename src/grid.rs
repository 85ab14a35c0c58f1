//! The tree grid: tree, row cache, layout and selection behind one API.
//!
//! `TreeGrid` owns every piece of mutable state, so hosts drive it from a
//! single thread and read notifications back with [`TreeGrid::drain_events`].
//! Mutations queue a layout pass; the host calls [`TreeGrid::update`] when
//! idle to run it. Keyboard navigation lays out immediately so the new
//! current row is on screen before the call returns.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheStats, RowCache};
use crate::config::GridConfig;
use crate::domain::{ExpansionSnapshot, FlatIndex, ItemsChange, NodeId, NodeRef, NodeTree};
use crate::events::{EventQueue, GridEvent};
use crate::settings::{SettingsCoordinator, Storage};
use crate::state::{SelectMode, SelectionModel};
use crate::traits::{FixedHeightPresenter, ItemSource, RowPresenter};
use crate::ui::navigation::{self, Navigation, NavigationTarget, ScrollRequest};
use crate::ui::{InvalidationKind, LayoutOutcome, ViewportLayoutEngine};

/// A row on screen after the latest pass.
#[derive(Debug)]
pub struct VisibleRow<'a, T, C> {
    pub index: usize,
    pub top: f32,
    pub height: f32,
    pub item: &'a T,
    /// Indentation depth, 0 for top-level rows.
    pub depth: usize,
    pub is_expanded: bool,
    pub has_children: bool,
    pub is_current: bool,
    pub is_selected: bool,
    pub content: &'a C,
}

/// Virtualized hierarchical grid over an [`ItemSource`].
pub struct TreeGrid<S, P>
where
    S: ItemSource,
    P: RowPresenter<S::Item>,
{
    tree: NodeTree<S>,
    cache: RowCache<P::Content>,
    presenter: P,
    layout: ViewportLayoutEngine,
    selection: SelectionModel,
    events: EventQueue,
    config: GridConfig,
}

impl<S: ItemSource> TreeGrid<S, FixedHeightPresenter> {
    /// Grid whose rows all have the configured fixed height.
    pub fn fixed(source: S, config: GridConfig) -> Self {
        let presenter = FixedHeightPresenter {
            row_height: config.row_height,
            header_height: config.header_height,
        };
        Self::with_config(source, presenter, config)
    }
}

impl<S, P> TreeGrid<S, P>
where
    S: ItemSource,
    P: RowPresenter<S::Item>,
{
    pub fn new(source: S, presenter: P) -> Self {
        Self::with_config(source, presenter, GridConfig::default())
    }

    pub fn with_config(source: S, presenter: P, config: GridConfig) -> Self {
        let tree = NodeTree::new(source);
        log::debug!("tree grid created with {} top-level rows", tree.total_rows());
        Self {
            tree,
            cache: RowCache::new(),
            presenter,
            layout: ViewportLayoutEngine::new(config.over_cache_factor),
            selection: SelectionModel::new(),
            events: EventQueue::new(),
            config,
        }
    }

    // ===== Accessors =====

    pub fn tree(&self) -> &NodeTree<S> {
        &self.tree
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn layout_engine(&self) -> &ViewportLayoutEngine {
        &self.layout
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Mutable presenter access. Queues a full pass, since anything that
    /// changes how rows are drawn may change how they measure.
    pub fn presenter_mut(&mut self) -> &mut P {
        self.layout.invalidate(InvalidationKind::Full);
        &mut self.presenter
    }

    // ===== Items =====

    /// Replaces the item source.
    ///
    /// # Arguments
    /// * `source` - New hierarchy
    /// * `full_reset` - Drop all nodes, selection and rows instead of
    ///   matching loaded items against the new source
    pub fn set_items(&mut self, source: S, full_reset: bool) {
        if full_reset {
            self.selection.release_all(&mut self.tree, &mut self.events);
            self.cache.clear(&mut self.tree);
            self.tree.reset(source);
            self.layout.reset();
        } else {
            self.tree.refresh_from_source(source);
            self.after_structure_change();
        }
        log::debug!("items replaced (full reset: {full_reset}), {} rows", self.tree.total_rows());
    }

    /// Applies a change to the child list of `parent`, or to the top
    /// level when `parent` is `None`.
    pub fn notify_items_changed(&mut self, parent: Option<&NodeRef>, change: ItemsChange<S::Item>) {
        let id = parent.map_or(self.tree.root(), NodeRef::id);
        self.tree.apply_change(id, change);
        self.after_structure_change();
    }

    fn after_structure_change(&mut self) {
        self.selection.prune_invalid(&mut self.tree, &mut self.events);
        self.cache.retain_valid(&mut self.tree);
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    // ===== Queries =====

    pub fn total_rows(&self) -> usize {
        self.tree.total_rows()
    }

    /// Reference to the node at row `index`. Release it with
    /// [`TreeGrid::release`].
    pub fn node_at(&mut self, index: usize) -> Option<NodeRef> {
        self.tree.create_node_reference(index)
    }

    pub fn release(&mut self, node: NodeRef) {
        self.tree.release(node);
    }

    pub fn clone_ref(&mut self, node: &NodeRef) -> NodeRef {
        self.tree.clone_ref(node)
    }

    /// Item at row `index`.
    pub fn item_at(&mut self, index: usize) -> Option<S::Item> {
        let node = self.tree.create_node_reference(index)?;
        let item = self.tree.item(node.id()).cloned();
        self.tree.release(node);
        item
    }

    pub fn item(&self, node: &NodeRef) -> Option<&S::Item> {
        self.tree.item(node.id())
    }

    pub fn flat_index(&self, node: &NodeRef) -> Option<FlatIndex> {
        self.tree.flat_index(node)
    }

    /// Depth of the node's row, 0 for top-level rows.
    pub fn level(&self, node: &NodeRef) -> usize {
        self.tree.level(node.id()).saturating_sub(1)
    }

    pub fn is_expanded(&self, node: &NodeRef) -> bool {
        self.tree.is_expanded(node.id())
    }

    pub fn has_children(&self, node: &NodeRef) -> bool {
        self.tree.has_children(node.id())
    }

    // ===== Expansion =====

    /// # Returns
    /// `true` if the expansion state changed.
    pub fn set_expanded(&mut self, node: &NodeRef, expanded: bool) -> bool {
        let changed = self.tree.set_expanded(node.id(), expanded);
        if changed {
            self.layout.invalidate(InvalidationKind::Arrange);
        }
        changed
    }

    pub fn expand(&mut self, node: &NodeRef) -> bool {
        self.set_expanded(node, true)
    }

    pub fn collapse(&mut self, node: &NodeRef) -> bool {
        self.set_expanded(node, false)
    }

    pub fn toggle_expansion(&mut self, node: &NodeRef) -> bool {
        let expanded = self.is_expanded(node);
        self.set_expanded(node, !expanded)
    }

    /// Expands `node` and its descendants down to `max_depth` levels.
    pub fn expand_subtree(&mut self, node: &NodeRef, max_depth: Option<usize>) {
        self.tree.expand_subtree(node.id(), max_depth);
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    pub fn collapse_subtree(&mut self, node: &NodeRef) {
        self.tree.collapse_subtree(node.id());
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    pub fn expand_all(&mut self, max_depth: Option<usize>) {
        self.tree.expand_all(max_depth);
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    pub fn collapse_all(&mut self) {
        self.tree.collapse_all();
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    pub fn save_expansion(&self) -> ExpansionSnapshot<S::Item> {
        self.tree.save_expansion()
    }

    /// # Returns
    /// Number of nodes expanded.
    pub fn restore_expansion(&mut self, snapshot: &ExpansionSnapshot<S::Item>) -> usize {
        let restored = self.tree.restore_expansion(snapshot);
        if restored > 0 {
            self.layout.invalidate(InvalidationKind::Arrange);
        }
        restored
    }

    // ===== Viewport =====

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.layout.set_viewport(width, height);
    }

    pub fn top_index(&self) -> usize {
        self.layout.top_index()
    }

    /// Scrolls so that `index` is the first row. Takes effect on the next
    /// [`TreeGrid::update`].
    pub fn set_top_index(&mut self, index: usize) {
        self.layout.set_top_index(index);
    }

    /// Runs the pending layout pass, if any.
    pub fn update(&mut self) -> Option<LayoutOutcome> {
        self.layout.needs_layout().then(|| self.run_layout())
    }

    /// Runs a layout pass now, pending or not.
    pub fn layout_now(&mut self) -> LayoutOutcome {
        self.run_layout()
    }

    fn run_layout(&mut self) -> LayoutOutcome {
        let selection = &self.selection;
        let outcome = self.layout.layout(
            &mut self.tree,
            &mut self.cache,
            &mut self.presenter,
            |id| selection.row_state(id),
        );
        self.events.push(GridEvent::LayoutComplete {
            pass: outcome.pass,
            filled: outcome.filled,
        });
        outcome
    }

    fn scroll(&mut self, request: ScrollRequest) {
        match request {
            ScrollRequest::None => {}
            ScrollRequest::TopDown(index) => {
                self.layout.set_top_index(index);
                self.run_layout();
            }
            ScrollRequest::BottomUp(index) => {
                self.layout.request_bottom_up(index);
                self.run_layout();
            }
        }
    }

    /// Rows placed by the latest pass, top to bottom.
    pub fn visible_rows(&self) -> Vec<VisibleRow<'_, S::Item, P::Content>> {
        self.layout
            .placements()
            .iter()
            .filter_map(|placement| {
                let row = self.cache.row(placement.slot)?;
                let id = row.node_id();
                Some(VisibleRow {
                    index: placement.index,
                    top: placement.top,
                    height: placement.height,
                    item: self.tree.item(id)?,
                    depth: self.tree.level(id).saturating_sub(1),
                    is_expanded: self.tree.is_expanded(id),
                    has_children: self.tree.has_children(id),
                    is_current: row.is_current(),
                    is_selected: row.is_selected(),
                    content: row.content(),
                })
            })
            .collect()
    }

    /// Makes `node` fully visible, expanding collapsed ancestors and
    /// laying out immediately if it has to scroll.
    ///
    /// # Returns
    /// `false` if the node has been invalidated.
    pub fn scroll_into_view(&mut self, node: &NodeRef) -> bool {
        if !self.tree.is_valid(node.id()) {
            return false;
        }
        let mut ancestors = Vec::new();
        let mut current = self.tree.node(node.id()).and_then(|n| n.parent);
        while let Some(id) = current {
            ancestors.push(id);
            current = self.tree.node(id).and_then(|n| n.parent);
        }
        for id in ancestors.into_iter().rev() {
            if self.tree.set_expanded(id, true) {
                self.layout.invalidate(InvalidationKind::Arrange);
            }
        }
        let Some(index) = self.tree.flat_index(node).map(|f| f.index) else {
            return false;
        };
        if self.layout.needs_layout() {
            self.run_layout();
        }
        let request = navigation::reveal(index, &self.layout);
        self.scroll(request);
        true
    }

    /// Reports a new measured height for `node`'s row.
    pub fn notify_row_height(&mut self, node: &NodeRef, height: f32) {
        if let Some(pass) = self.cache.update_height(node.id(), height) {
            self.layout.on_row_height_changed(pass);
        }
    }

    // ===== Selection =====

    /// Applies `mode` to `node` and makes it current.
    ///
    /// # Returns
    /// `false` if the node has no exposed row.
    pub fn select(&mut self, node: &NodeRef, mode: SelectMode) -> bool {
        self.selection.begin_suppress();
        let applied = self.selection.apply(&mut self.tree, &mut self.events, node, mode);
        if applied {
            self.selection.set_current(&mut self.tree, &mut self.events, Some(node));
        }
        self.selection.end_suppress(&self.tree, &mut self.events);
        self.layout.invalidate(InvalidationKind::Arrange);
        applied
    }

    pub fn deselect(&mut self, node: &NodeRef) {
        self.selection.remove(&mut self.tree, &mut self.events, node);
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear(&mut self.tree, &mut self.events);
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    pub fn is_selected(&self, node: &NodeRef) -> bool {
        self.selection.is_selected(node.id())
    }

    pub fn selection_len(&self) -> usize {
        self.selection.len()
    }

    /// Owned clones of the selected references in row order. Release each
    /// one when done.
    pub fn selected_refs(&mut self) -> Vec<NodeRef> {
        self.selection.selected_refs(&mut self.tree)
    }

    /// Selected items in row order.
    pub fn selected_items(&mut self) -> Vec<S::Item> {
        let refs = self.selection.selected_refs(&mut self.tree);
        let items = refs
            .iter()
            .filter_map(|node| self.tree.item(node.id()).cloned())
            .collect();
        for node in refs {
            self.tree.release(node);
        }
        items
    }

    /// Runs `f` with selection notifications held back; one event per
    /// kind fires when it returns.
    pub fn batch_selection<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.selection.begin_suppress();
        let result = f(self);
        self.selection.end_suppress(&self.tree, &mut self.events);
        result
    }

    pub fn current(&self) -> Option<&NodeRef> {
        self.selection.current()
    }

    /// Flat index of the current node while its row is exposed.
    pub fn current_index(&self) -> Option<usize> {
        self.selection
            .current()
            .and_then(|current| self.tree.flat_index(current))
            .filter(|f| f.fully_visible)
            .map(|f| f.index)
    }

    pub fn set_current(&mut self, node: Option<&NodeRef>) {
        self.selection.set_current(&mut self.tree, &mut self.events, node);
        self.layout.invalidate(InvalidationKind::Arrange);
    }

    // ===== Navigation =====

    /// Moves the current row, scrolling it into view and applying `mode`
    /// to the selection. Runs at most one layout pass; rows that stay on
    /// screen only have their flags rebound.
    ///
    /// # Returns
    /// The new current row, or `None` when there are no rows.
    pub fn navigate(&mut self, nav: Navigation, mode: SelectMode) -> Option<usize> {
        if self.layout.needs_layout() {
            self.run_layout();
        }
        let plan = navigation::plan(
            nav,
            self.current_index(),
            self.tree.total_rows(),
            &self.layout,
            self.config.page_overlap_rows,
        )?;
        let target = match plan.target {
            // Known up front: the scroll pass binds the new flags itself.
            NavigationTarget::Index(target) => {
                self.move_current(target, mode)?;
                self.scroll(plan.scroll);
                target
            }
            _ => {
                self.scroll(plan.scroll);
                let target = plan.target.resolve(&self.layout)?;
                self.move_current(target, mode)?;
                target
            }
        };
        if plan.scroll == ScrollRequest::None || !matches!(plan.target, NavigationTarget::Index(_)) {
            let selection = &self.selection;
            self.cache
                .restate(&self.tree, &mut self.presenter, |id| selection.row_state(id));
        }
        log::trace!("navigate {nav:?} -> row {target}");
        Some(target)
    }

    fn move_current(&mut self, target: usize, mode: SelectMode) -> Option<()> {
        let node = self.tree.create_node_reference(target)?;
        self.selection.begin_suppress();
        self.selection.set_current(&mut self.tree, &mut self.events, Some(&node));
        self.selection.apply(&mut self.tree, &mut self.events, &node, mode);
        self.selection.end_suppress(&self.tree, &mut self.events);
        self.tree.release(node);
        Some(())
    }

    // ===== Events and Statistics =====

    pub fn drain_events(&mut self) -> Vec<GridEvent> {
        self.events.drain()
    }

    pub fn layout_pass(&self) -> u64 {
        self.layout.layout_pass()
    }

    pub fn content_width(&self) -> f32 {
        self.layout.content_width()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn rebind_count(&self) -> u64 {
        self.cache.stats().rebinds
    }

    /// Whether the row for `id` is in the row cache.
    pub fn is_cached(&self, id: NodeId) -> bool {
        self.cache.slot_for(id).is_some()
    }
}

impl<S, P> TreeGrid<S, P>
where
    S: ItemSource,
    S::Item: Serialize + DeserializeOwned,
    P: RowPresenter<S::Item>,
{
    /// Stores the expansion snapshot under `key`.
    pub fn save_expansion_to(&self, storage: &mut dyn Storage, key: &str) -> anyhow::Result<()> {
        SettingsCoordinator::save_setting(storage, key, &self.save_expansion())
    }

    /// Replays a snapshot stored under `key`; a missing or unreadable one
    /// restores nothing.
    pub fn restore_expansion_from(&mut self, storage: &dyn Storage, key: &str) -> usize {
        let snapshot: ExpansionSnapshot<S::Item> = SettingsCoordinator::load_setting(Some(storage), key);
        self.restore_expansion(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FnSource;

    type Grid = TreeGrid<FnSource<String>, FixedHeightPresenter>;

    /// Top-level "0".."9", each with children "<n>.0".."<n>.2".
    fn source() -> FnSource<String> {
        FnSource::new(
            (0..10).map(|i| i.to_string()).collect(),
            |item: &String| (!item.contains('.')).then(|| (0..3).map(|c| format!("{item}.{c}")).collect()),
            |item: &String| !item.contains('.'),
        )
    }

    fn grid(height: f32) -> Grid {
        let config = GridConfig {
            row_height: 10.0,
            header_height: 10.0,
            ..GridConfig::default()
        };
        let mut grid = TreeGrid::fixed(source(), config);
        grid.set_viewport(100.0, height);
        grid
    }

    fn visible_items(grid: &Grid) -> Vec<String> {
        grid.visible_rows().iter().map(|row| row.item.clone()).collect()
    }

    #[test]
    fn test_initial_layout() {
        let mut g = grid(30.0);
        let outcome = g.update().unwrap();
        assert!(outcome.filled);
        assert_eq!(visible_items(&g), vec!["0", "1", "2"]);
        assert!(g.update().is_none());
    }

    #[test]
    fn test_expand_shows_children() {
        let mut g = grid(50.0);
        g.update();
        let node = g.node_at(0).unwrap();
        assert!(g.expand(&node));
        g.update();
        assert_eq!(visible_items(&g), vec!["0", "0.0", "0.1", "0.2", "1"]);
        let rows = g.visible_rows();
        assert_eq!(rows[1].depth, 1);
        assert!(rows[0].is_expanded);
        g.release(node);
    }

    #[test]
    fn test_navigate_down_scrolls_bottom_up() {
        let mut g = grid(30.0);
        g.update();
        // No current row yet, so the first Down lands on row 0.
        for _ in 0..4 {
            g.navigate(Navigation::Down, SelectMode::Single);
        }
        // Row 3 is below the first viewport.
        assert_eq!(g.current_index(), Some(3));
        assert_eq!(visible_items(&g), vec!["1", "2", "3"]);
        assert_eq!(g.selected_items(), vec!["3".to_string()]);
        let current_rows: Vec<_> = g.visible_rows().into_iter().filter(|r| r.is_current).collect();
        assert_eq!(current_rows.len(), 1);
        assert_eq!(current_rows[0].index, 3);
    }

    #[test]
    fn test_navigate_runs_at_most_one_pass() {
        let mut g = grid(30.0);
        g.update();
        let commands = [
            Navigation::Down,
            Navigation::Down,
            Navigation::Down,
            Navigation::Down,
            Navigation::PageDown,
            Navigation::PageDown,
            Navigation::End,
            Navigation::PageUp,
            Navigation::Home,
        ];
        for nav in commands {
            g.drain_events();
            let before = g.layout_pass();
            let target = g.navigate(nav, SelectMode::Single).unwrap();
            let layouts = g
                .drain_events()
                .into_iter()
                .filter(|e| matches!(e, GridEvent::LayoutComplete { .. }))
                .count();
            assert!(layouts <= 1, "{nav:?} ran {layouts} passes");
            assert!(g.layout_pass() - before <= 1);
            let current: Vec<usize> = g
                .visible_rows()
                .into_iter()
                .filter(|r| r.is_current)
                .map(|r| r.index)
                .collect();
            assert_eq!(current, vec![target], "{nav:?}");
        }
    }

    #[test]
    fn test_navigate_extend_selects_range() {
        let mut g = grid(50.0);
        g.update();
        g.navigate(Navigation::Home, SelectMode::Single);
        g.navigate(Navigation::Down, SelectMode::Extend);
        g.navigate(Navigation::Down, SelectMode::Extend);
        assert_eq!(g.selected_items(), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_scroll_into_view_expands_ancestors() {
        let mut g = grid(30.0);
        g.update();
        let mut node = g.node_at(9).unwrap();
        assert!(g.tree.move_to_child(&mut node, 2));
        assert!(g.scroll_into_view(&node));
        assert!(g.tree.is_expanded(g.tree.node(node.id()).unwrap().parent.unwrap()));
        assert_eq!(g.flat_index(&node).unwrap().index, 12);
        assert!(g.layout_engine().is_fully_visible(12));
        g.release(node);
    }

    #[test]
    fn test_full_reset_clears_selection_and_rows() {
        let mut g = grid(30.0);
        g.update();
        g.navigate(Navigation::Down, SelectMode::Single);
        g.drain_events();
        g.set_items(source(), true);
        assert_eq!(g.selection_len(), 0);
        assert!(g.current().is_none());
        assert_eq!(g.cache_len(), 0);
        assert_eq!(g.tree().live_nodes(), 1);
        let events = g.drain_events();
        assert!(events.contains(&GridEvent::CurrentChanged { index: None }));
        assert!(events.contains(&GridEvent::SelectionChanged { selected: 0 }));
    }

    #[test]
    fn test_row_height_change_invalidates_pass() {
        let mut g = grid(30.0);
        g.update();
        let node = g.node_at(1).unwrap();
        g.notify_row_height(&node, 25.0);
        assert!(g.layout_engine().needs_layout());
        g.update();
        let tops: Vec<f32> = g.visible_rows().iter().map(|r| r.top).collect();
        assert_eq!(tops, vec![0.0, 10.0]);
        g.release(node);
    }
}
