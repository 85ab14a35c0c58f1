//! Keyboard navigation planning.
//!
//! A navigation command resolves to a target row and, when the target is
//! not already fully on screen, a scroll that brings it into view. Page
//! commands may only know their target after the scroll has been laid
//! out, so the target can name a position in the resulting viewport.

use crate::ui::viewport_layout::ViewportLayoutEngine;

/// Keyboard navigation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
}

/// Scroll needed before the target can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollRequest {
    /// Target already fully visible.
    None,
    /// Top-down pass with this row first.
    TopDown(usize),
    /// Bottom-up pass with this row last.
    BottomUp(usize),
}

/// Row that becomes current once the scroll is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTarget {
    Index(usize),
    /// First row of the viewport after the scroll.
    FirstVisible,
    /// Last fully visible row after the scroll.
    LastFullyVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationPlan {
    pub scroll: ScrollRequest,
    pub target: NavigationTarget,
}

impl NavigationTarget {
    /// Resolves the target against a freshly laid out viewport.
    pub fn resolve(self, layout: &ViewportLayoutEngine) -> Option<usize> {
        match self {
            NavigationTarget::Index(index) => Some(index),
            NavigationTarget::FirstVisible => layout.first_visible(),
            NavigationTarget::LastFullyVisible => layout.last_fully_visible(),
        }
    }
}

/// Scroll that makes `index` fully visible with minimal movement.
pub fn reveal(index: usize, layout: &ViewportLayoutEngine) -> ScrollRequest {
    if layout.is_fully_visible(index) {
        return ScrollRequest::None;
    }
    match layout.first_visible() {
        Some(first) if index > first => ScrollRequest::BottomUp(index),
        _ => ScrollRequest::TopDown(index),
    }
}

/// Plans a navigation command.
///
/// # Arguments
/// * `nav` - Command to plan
/// * `current` - Flat index of the current row, if any
/// * `total` - Number of rows
/// * `layout` - Viewport as of the latest pass
/// * `page_overlap` - Rows kept on screen across a page move
///
/// # Returns
/// `None` when there are no rows to navigate.
pub fn plan(
    nav: Navigation,
    current: Option<usize>,
    total: usize,
    layout: &ViewportLayoutEngine,
    page_overlap: usize,
) -> Option<NavigationPlan> {
    if total == 0 {
        return None;
    }
    let last = total - 1;
    let to_index = |index: usize| NavigationPlan {
        scroll: reveal(index, layout),
        target: NavigationTarget::Index(index),
    };

    let plan = match nav {
        Navigation::Up => to_index(current.map_or(0, |c| c.saturating_sub(1).min(last))),
        Navigation::Down => to_index(current.map_or(0, |c| (c + 1).min(last))),
        Navigation::Home => to_index(0),
        Navigation::End => NavigationPlan {
            scroll: if layout.is_fully_visible(last) {
                ScrollRequest::None
            } else {
                ScrollRequest::BottomUp(last)
            },
            target: NavigationTarget::Index(last),
        },
        Navigation::PageUp => match (current, layout.first_visible()) {
            (Some(c), Some(first)) if c > first && c <= last => NavigationPlan {
                scroll: ScrollRequest::None,
                target: NavigationTarget::Index(first),
            },
            // Already at the top of the page: the old first row becomes
            // the bottom of the new page and the new top becomes current.
            (_, Some(first)) if first > 0 => NavigationPlan {
                scroll: ScrollRequest::BottomUp((first + page_overlap).min(last)),
                target: NavigationTarget::FirstVisible,
            },
            _ => to_index(0),
        },
        Navigation::PageDown => match (current, layout.last_fully_visible()) {
            (Some(c), Some(bottom)) if c < bottom => NavigationPlan {
                scroll: ScrollRequest::None,
                target: NavigationTarget::Index(bottom),
            },
            (_, Some(bottom)) if bottom < last => NavigationPlan {
                scroll: ScrollRequest::TopDown(bottom.saturating_sub(page_overlap)),
                target: NavigationTarget::LastFullyVisible,
            },
            _ => to_index(last),
        },
    };
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{RowCache, RowState};
    use crate::domain::NodeTree;
    use crate::traits::{FixedHeightPresenter, FnSource};

    /// Lays out 100 rows of height 10 in a 40px viewport starting at `top`.
    fn layout_at(top: usize) -> ViewportLayoutEngine {
        let mut tree = NodeTree::new(FnSource::flat((0..100u32).collect()));
        let mut cache = RowCache::new();
        let mut presenter = FixedHeightPresenter::new(10.0);
        let mut engine = ViewportLayoutEngine::new(4);
        engine.set_viewport(100.0, 40.0);
        engine.set_top_index(top);
        engine.layout(&mut tree, &mut cache, &mut presenter, |_| RowState::default());
        cache.clear(&mut tree);
        engine
    }

    #[test]
    fn test_no_rows_no_plan() {
        let engine = ViewportLayoutEngine::new(4);
        assert_eq!(plan(Navigation::Down, None, 0, &engine, 0), None);
    }

    #[test]
    fn test_down_inside_viewport_does_not_scroll() {
        let engine = layout_at(10);
        let p = plan(Navigation::Down, Some(11), 100, &engine, 0).unwrap();
        assert_eq!(p.scroll, ScrollRequest::None);
        assert_eq!(p.target, NavigationTarget::Index(12));
    }

    #[test]
    fn test_down_past_bottom_scrolls_bottom_up() {
        let engine = layout_at(10);
        let p = plan(Navigation::Down, Some(13), 100, &engine, 0).unwrap();
        assert_eq!(p.scroll, ScrollRequest::BottomUp(14));
    }

    #[test]
    fn test_up_past_top_scrolls_top_down() {
        let engine = layout_at(10);
        let p = plan(Navigation::Up, Some(10), 100, &engine, 0).unwrap();
        assert_eq!(p.scroll, ScrollRequest::TopDown(9));
        assert_eq!(p.target, NavigationTarget::Index(9));
    }

    #[test]
    fn test_page_up_moves_to_first_visible_then_pages() {
        let engine = layout_at(10);
        let p = plan(Navigation::PageUp, Some(12), 100, &engine, 0).unwrap();
        assert_eq!(p.target, NavigationTarget::Index(10));
        assert_eq!(p.scroll, ScrollRequest::None);

        let p = plan(Navigation::PageUp, Some(10), 100, &engine, 0).unwrap();
        assert_eq!(p.scroll, ScrollRequest::BottomUp(10));
        assert_eq!(p.target, NavigationTarget::FirstVisible);
    }

    #[test]
    fn test_page_down_moves_to_last_fully_visible_then_pages() {
        let engine = layout_at(10);
        let p = plan(Navigation::PageDown, Some(10), 100, &engine, 0).unwrap();
        assert_eq!(p.target, NavigationTarget::Index(13));

        let p = plan(Navigation::PageDown, Some(13), 100, &engine, 0).unwrap();
        assert_eq!(p.scroll, ScrollRequest::TopDown(13));
        assert_eq!(p.target, NavigationTarget::LastFullyVisible);
    }

    #[test]
    fn test_home_and_end() {
        let engine = layout_at(10);
        let home = plan(Navigation::Home, Some(12), 100, &engine, 0).unwrap();
        assert_eq!(home.scroll, ScrollRequest::TopDown(0));
        let end = plan(Navigation::End, Some(12), 100, &engine, 0).unwrap();
        assert_eq!(end.scroll, ScrollRequest::BottomUp(99));
        assert_eq!(end.target, NavigationTarget::Index(99));
    }
}
