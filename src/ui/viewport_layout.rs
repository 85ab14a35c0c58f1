//! Viewport layout: which rows are on screen and where.
//!
//! A pass starts from `top_index` and runs in one of two directions:
//!
//! - **Top-down**: walk forward from `top_index` until the viewport is
//!   full. Used for scrolling, initial layout and explicit top-index
//!   assignment.
//! - **Bottom-up**: `top_index` names the row that must end up fully
//!   visible at the bottom. Walk backward until the viewport is full,
//!   then fill any trailing space forward. Afterwards `top_index` is
//!   quietly corrected to the real first row and the mode reverts to
//!   top-down, so the next pass reproduces the same picture.
//!
//! Invalidations queue up and collapse into a single pending pass that
//! the host flushes when idle. Navigation runs its pass immediately.

use crate::cache::{Row, RowCache, RowState};
use crate::domain::{NodeId, NodeRef, NodeTree};
use crate::traits::{ItemSource, RowPresenter};
use crate::ui::virtual_scrolling::row_cache_capacity;

/// Direction of the next layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    TopDown,
    BottomUp,
}

/// Why a pass is needed. `Full` also remeasures every row and relocks the
/// content width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InvalidationKind {
    Arrange,
    Full,
}

/// One row placed by the latest pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Row cache slot.
    pub slot: usize,
    /// Flat index of the row.
    pub index: usize,
    /// Offset from the top of the viewport.
    pub top: f32,
    pub height: f32,
}

/// Summary of a finished pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOutcome {
    pub pass: u64,
    /// Whether rows cover the whole viewport height.
    pub filled: bool,
    pub first: Option<usize>,
    pub last: Option<usize>,
    pub rows: usize,
}

/// Borrowed collaborators for the duration of one pass.
struct PassContext<'a, S, P, F>
where
    S: ItemSource,
    P: RowPresenter<S::Item>,
{
    tree: &'a mut NodeTree<S>,
    cache: &'a mut RowCache<P::Content>,
    presenter: &'a mut P,
    row_state: F,
    pass: u64,
    remeasure: bool,
}

impl<S, P, F> PassContext<'_, S, P, F>
where
    S: ItemSource,
    P: RowPresenter<S::Item>,
    F: Fn(NodeId) -> RowState,
{
    fn row_for(&mut self, node: &NodeRef) -> (usize, f32) {
        let state = (self.row_state)(node.id());
        let slot = self
            .cache
            .get_row(self.tree, self.presenter, node, state, self.pass, self.remeasure);
        (slot, self.cache.row(slot).map_or(0.0, Row::height))
    }

    /// Height a cached row will report this pass without touching it.
    /// `None` when the row is not cached or is about to be remeasured.
    fn known_height(&self, node: &NodeRef) -> Option<f32> {
        if self.remeasure {
            return None;
        }
        let slot = self.cache.slot_for(node.id())?;
        self.cache.row(slot).map(Row::height)
    }
}

/// Decides which flat indices are visible and feeds them through the
/// row cache.
#[derive(Debug, Clone)]
pub struct ViewportLayoutEngine {
    top_index: usize,
    mode: LayoutMode,
    viewport_width: f32,
    viewport_height: f32,
    over_cache_factor: usize,
    header_height: f32,
    /// Generation of the latest pass.
    layout_pass: u64,
    /// Generation current when the pending invalidation was first raised.
    invalidated_pass: Option<u64>,
    pending: Option<InvalidationKind>,
    placements: Vec<Placement>,
    content_width: f32,
    filled: bool,
}

impl ViewportLayoutEngine {
    pub fn new(over_cache_factor: usize) -> Self {
        Self {
            top_index: 0,
            mode: LayoutMode::TopDown,
            viewport_width: 0.0,
            viewport_height: 0.0,
            over_cache_factor,
            header_height: 0.0,
            layout_pass: 0,
            invalidated_pass: Some(0),
            pending: Some(InvalidationKind::Full),
            placements: Vec::new(),
            content_width: 0.0,
            filled: false,
        }
    }

    // ===== Queries =====

    pub fn top_index(&self) -> usize {
        self.top_index
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn viewport_width(&self) -> f32 {
        self.viewport_width
    }

    pub fn layout_pass(&self) -> u64 {
        self.layout_pass
    }

    /// Rows placed by the latest pass, top to bottom.
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Widest row seen by the latest full pass.
    pub fn content_width(&self) -> f32 {
        self.content_width
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Whether a pass is pending.
    pub fn needs_layout(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<InvalidationKind> {
        self.pending
    }

    /// Generation that was current when the pending invalidation was
    /// raised, if any.
    pub fn invalidated_pass(&self) -> Option<u64> {
        self.invalidated_pass
    }

    pub fn first_visible(&self) -> Option<usize> {
        self.placements.first().map(|p| p.index)
    }

    pub fn last_visible(&self) -> Option<usize> {
        self.placements.last().map(|p| p.index)
    }

    /// Last row whose bottom edge is inside the viewport.
    pub fn last_fully_visible(&self) -> Option<usize> {
        self.placements
            .iter()
            .rev()
            .find(|p| p.top + p.height <= self.viewport_height)
            .or(self.placements.first())
            .map(|p| p.index)
    }

    /// Number of rows fully inside the viewport.
    pub fn fully_visible_rows(&self) -> usize {
        self.placements
            .iter()
            .filter(|p| p.top + p.height <= self.viewport_height)
            .count()
    }

    /// Whether `index` was placed fully inside the viewport.
    pub fn is_fully_visible(&self, index: usize) -> bool {
        match (self.first_visible(), self.last_fully_visible()) {
            (Some(first), Some(last)) => first <= index && index <= last,
            _ => false,
        }
    }

    // ===== Invalidation =====

    /// Queues a pass. Repeated calls before the next pass collapse into
    /// one, keeping the strongest kind.
    pub fn invalidate(&mut self, kind: InvalidationKind) {
        self.pending = Some(self.pending.map_or(kind, |pending| pending.max(kind)));
        self.invalidated_pass.get_or_insert(self.layout_pass);
    }

    /// Updates the viewport size, queueing a pass if it changed.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        if width == self.viewport_width && height == self.viewport_height {
            return;
        }
        self.viewport_width = width;
        self.viewport_height = height;
        self.invalidate(InvalidationKind::Arrange);
    }

    /// Scrolls so that `index` is the first row (top-down pass).
    pub fn set_top_index(&mut self, index: usize) {
        if index == self.top_index && self.mode == LayoutMode::TopDown {
            return;
        }
        self.top_index = index;
        self.mode = LayoutMode::TopDown;
        self.invalidate(InvalidationKind::Arrange);
    }

    /// Arranges for `index` to be the last fully visible row. The caller
    /// is expected to run the pass right away.
    pub fn request_bottom_up(&mut self, index: usize) {
        self.top_index = index;
        self.mode = LayoutMode::BottomUp;
        self.invalidate(InvalidationKind::Arrange);
    }

    /// Invalidates the pass if a row used in it changed height.
    pub fn on_row_height_changed(&mut self, row_pass: u64) {
        if row_pass == self.layout_pass {
            self.invalidate(InvalidationKind::Arrange);
        }
    }

    /// Back to the first row, with a full pass queued.
    pub fn reset(&mut self) {
        self.top_index = 0;
        self.mode = LayoutMode::TopDown;
        self.placements.clear();
        self.content_width = 0.0;
        self.filled = false;
        self.invalidate(InvalidationKind::Full);
    }

    // ===== Layout =====

    /// Runs one pass, consuming any pending invalidation.
    ///
    /// # Arguments
    /// * `tree` - Tree to read rows from
    /// * `cache` - Row pool rows are requested from
    /// * `presenter` - Binds and measures rows
    /// * `row_state` - Current/selected flags per node
    pub fn layout<S, P, F>(
        &mut self,
        tree: &mut NodeTree<S>,
        cache: &mut RowCache<P::Content>,
        presenter: &mut P,
        row_state: F,
    ) -> LayoutOutcome
    where
        S: ItemSource,
        P: RowPresenter<S::Item>,
        F: Fn(NodeId) -> RowState,
    {
        let kind = self.pending.take().unwrap_or(InvalidationKind::Arrange);
        self.invalidated_pass = None;
        self.layout_pass += 1;
        let pass = self.layout_pass;
        self.placements.clear();

        if self.viewport_height <= 0.0 {
            log::debug!("layout pass {pass} skipped: viewport has no height");
            cache.finish_pass(tree, pass, &[]);
            self.filled = false;
            return self.outcome(pass);
        }

        let full = kind == InvalidationKind::Full;
        if full || self.header_height <= 0.0 {
            self.header_height = presenter.header_height();
        }
        cache.set_capacity(row_cache_capacity(
            self.viewport_height,
            self.header_height,
            self.over_cache_factor,
        ));

        let total = tree.total_rows();
        if total == 0 {
            self.top_index = 0;
            self.mode = LayoutMode::TopDown;
            cache.finish_pass(tree, pass, &[]);
            self.filled = false;
            return self.outcome(pass);
        }
        if self.top_index >= total {
            log::debug!("top index {} past {} rows, laying out from the end", self.top_index, total);
            self.top_index = total - 1;
            self.mode = LayoutMode::BottomUp;
        }

        let mut ctx = PassContext {
            tree,
            cache,
            presenter,
            row_state,
            pass,
            remeasure: full,
        };
        let reached = match self.mode {
            LayoutMode::TopDown => self.fill_forward(&mut ctx, self.top_index, 0.0),
            LayoutMode::BottomUp => self.fill_bottom_up(&mut ctx),
        };

        let slots: Vec<usize> = self.placements.iter().map(|p| p.slot).collect();
        for placement in &self.placements {
            ctx.cache.place(placement.slot, placement.top);
        }
        ctx.cache.finish_pass(ctx.tree, pass, &slots);
        if full {
            self.content_width = ctx.cache.max_width();
        }
        self.filled = reached >= self.viewport_height;
        self.outcome(pass)
    }

    fn fill_forward<S, P, F>(&mut self, ctx: &mut PassContext<'_, S, P, F>, start: usize, start_y: f32) -> f32
    where
        S: ItemSource,
        P: RowPresenter<S::Item>,
        F: Fn(NodeId) -> RowState,
    {
        let Some(mut cursor) = ctx.tree.create_node_reference(start) else {
            return start_y;
        };
        let mut y = start_y;
        let mut index = start;
        loop {
            let (slot, height) = ctx.row_for(&cursor);
            self.placements.push(Placement { slot, index, top: y, height });
            y += height;
            if y >= self.viewport_height || !ctx.tree.move_to_next(&mut cursor) {
                break;
            }
            index += 1;
        }
        ctx.tree.release(cursor);
        y
    }

    fn fill_bottom_up<S, P, F>(&mut self, ctx: &mut PassContext<'_, S, P, F>) -> f32
    where
        S: ItemSource,
        P: RowPresenter<S::Item>,
        F: Fn(NodeId) -> RowState,
    {
        let target = self.top_index;
        let Some(mut cursor) = ctx.tree.create_node_reference(target) else {
            return 0.0;
        };

        // (slot, index, height), collected bottom to top.
        let mut collected: Vec<(usize, usize, f32)> = Vec::new();
        let mut used = 0.0;
        let mut index = target;
        loop {
            // The target row is always kept; rows above it only if whole.
            // A cached row that cannot fit is left alone.
            if !collected.is_empty()
                && ctx
                    .known_height(&cursor)
                    .is_some_and(|height| used + height > self.viewport_height)
            {
                break;
            }
            let (slot, height) = ctx.row_for(&cursor);
            if !collected.is_empty() && used + height > self.viewport_height {
                break;
            }
            collected.push((slot, index, height));
            used += height;
            if used >= self.viewport_height || !ctx.tree.move_to_previous(&mut cursor) {
                break;
            }
            index -= 1;
        }
        ctx.tree.release(cursor);

        let mut y = 0.0;
        for &(slot, index, height) in collected.iter().rev() {
            self.placements.push(Placement { slot, index, top: y, height });
            y += height;
        }
        let first = collected.last().map_or(target, |&(_, index, _)| index);

        if y < self.viewport_height && target + 1 < ctx.tree.total_rows() {
            y = self.fill_forward(ctx, target + 1, y);
        }

        // Quiet correction: no invalidation, so this pass is not repeated.
        self.top_index = first;
        self.mode = LayoutMode::TopDown;
        y
    }

    fn outcome(&self, pass: u64) -> LayoutOutcome {
        LayoutOutcome {
            pass,
            filled: self.filled,
            first: self.first_visible(),
            last: self.last_visible(),
            rows: self.placements.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{FixedHeightPresenter, FnSource};

    struct Fixture {
        tree: NodeTree<FnSource<u32>>,
        cache: RowCache<()>,
        presenter: FixedHeightPresenter,
        engine: ViewportLayoutEngine,
    }

    impl Fixture {
        fn new(rows: u32, viewport_height: f32) -> Self {
            let mut engine = ViewportLayoutEngine::new(4);
            engine.set_viewport(200.0, viewport_height);
            Self {
                tree: NodeTree::new(FnSource::flat((0..rows).collect())),
                cache: RowCache::new(),
                presenter: FixedHeightPresenter::new(10.0),
                engine,
            }
        }

        fn run(&mut self) -> LayoutOutcome {
            self.engine
                .layout(&mut self.tree, &mut self.cache, &mut self.presenter, |_| RowState::default())
        }

        fn indices(&self) -> Vec<usize> {
            self.engine.placements().iter().map(|p| p.index).collect()
        }
    }

    #[test]
    fn test_top_down_fills_viewport() {
        let mut f = Fixture::new(100, 45.0);
        let outcome = f.run();
        assert!(outcome.filled);
        assert_eq!(f.indices(), vec![0, 1, 2, 3, 4]);
        assert_eq!(f.engine.last_fully_visible(), Some(3));
        assert_eq!(f.cache.capacity(), 20);
        let tops: Vec<f32> = f.engine.placements().iter().map(|p| p.top).collect();
        assert_eq!(tops, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_short_sequence_does_not_fill() {
        let mut f = Fixture::new(3, 50.0);
        let outcome = f.run();
        assert!(!outcome.filled);
        assert_eq!(outcome.rows, 3);
    }

    #[test]
    fn test_zero_height_is_a_no_op() {
        let mut f = Fixture::new(10, 0.0);
        let outcome = f.run();
        assert!(!outcome.filled);
        assert_eq!(outcome.rows, 0);
        assert!(f.cache.is_empty());
    }

    #[test]
    fn test_bottom_up_lands_target_at_bottom() {
        let mut f = Fixture::new(100, 40.0);
        f.run();
        f.engine.request_bottom_up(50);
        f.run();
        assert_eq!(f.indices(), vec![47, 48, 49, 50]);
        assert_eq!(f.engine.top_index(), 47);
        assert_eq!(f.engine.mode(), LayoutMode::TopDown);
        assert!(!f.engine.needs_layout());

        // The corrected top index reproduces the same rows.
        f.engine.invalidate(InvalidationKind::Arrange);
        f.run();
        assert_eq!(f.indices(), vec![47, 48, 49, 50]);
    }

    #[test]
    fn test_bottom_up_skips_cached_row_that_cannot_fit() {
        let mut f = Fixture::new(100, 45.0);
        f.engine.set_top_index(16);
        let first = f.run();
        assert_eq!(f.indices(), vec![16, 17, 18, 19, 20]);

        f.engine.request_bottom_up(20);
        let second = f.run();
        assert_eq!(f.indices(), vec![17, 18, 19, 20, 21]);

        let node = f.tree.create_node_reference(16).unwrap();
        let slot = f.cache.slot_for(node.id()).unwrap();
        let row = f.cache.row(slot).unwrap();
        // Neither rebound nor stamped by the second pass.
        assert_eq!(row.layout_pass(), first.pass);
        assert_ne!(row.layout_pass(), second.pass);
        assert!(!row.is_visible());
        f.tree.release(node);
    }

    #[test]
    fn test_bottom_up_near_start_fills_forward() {
        let mut f = Fixture::new(100, 40.0);
        f.engine.request_bottom_up(1);
        f.run();
        assert_eq!(f.indices(), vec![0, 1, 2, 3]);
        assert_eq!(f.engine.top_index(), 0);
    }

    #[test]
    fn test_top_index_past_end_is_clamped() {
        let mut f = Fixture::new(10, 40.0);
        f.engine.set_top_index(25);
        f.run();
        assert_eq!(f.indices(), vec![6, 7, 8, 9]);
        assert_eq!(f.engine.top_index(), 6);
    }

    #[test]
    fn test_same_top_index_twice_is_all_hits() {
        let mut f = Fixture::new(100, 40.0);
        f.run();
        let before = f.cache.stats();
        f.engine.invalidate(InvalidationKind::Arrange);
        f.run();
        let after = f.cache.stats();
        assert_eq!(after.rebinds, before.rebinds);
        assert_eq!(after.grows, before.grows);
        assert_eq!(after.hits - before.hits, 4);
    }

    #[test]
    fn test_invalidations_coalesce() {
        let mut f = Fixture::new(10, 40.0);
        f.run();
        f.engine.invalidate(InvalidationKind::Arrange);
        f.engine.invalidate(InvalidationKind::Full);
        f.engine.invalidate(InvalidationKind::Arrange);
        assert_eq!(f.engine.pending(), Some(InvalidationKind::Full));
        assert_eq!(f.engine.invalidated_pass(), Some(1));
        let pass = f.run().pass;
        assert_eq!(pass, 2);
        assert!(!f.engine.needs_layout());
    }

    #[test]
    fn test_height_change_invalidates_only_current_pass() {
        let mut f = Fixture::new(10, 40.0);
        f.run();
        f.engine.on_row_height_changed(0);
        assert!(!f.engine.needs_layout());
        f.engine.on_row_height_changed(1);
        assert!(f.engine.needs_layout());
    }

    #[test]
    fn test_unused_rows_are_hidden_not_destroyed() {
        let mut f = Fixture::new(100, 40.0);
        f.run();
        f.engine.set_top_index(2);
        f.run();
        assert_eq!(f.cache.len(), 6);
        let visible = f.cache.iter_recent().filter(|row| row.is_visible()).count();
        assert_eq!(visible, 4);
    }
}
