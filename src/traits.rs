//! Seams between the grid engine and its host.
//!
//! The host supplies the hierarchy through [`ItemSource`] and the row
//! visuals through [`RowPresenter`]. The engine never inspects items
//! beyond equality and hashing.

use std::hash::Hash;

/// Trait for accessing an externally supplied hierarchy.
///
/// Both functions may be called at arbitrary times during layout and are
/// expected to be free of side effects. The hierarchy may be unbounded;
/// children are only requested for nodes that get expanded or visited.
pub trait ItemSource {
    /// Item type. Equality is used to match items across refreshes and
    /// hashing keys expansion snapshots.
    type Item: Clone + Eq + Hash;

    /// Returns the top-level item sequence.
    fn top_level(&self) -> Vec<Self::Item>;

    /// Returns the children of `item`. `None` means no children.
    fn children(&self, item: &Self::Item) -> Option<Vec<Self::Item>>;

    /// Cheap check used to draw expanders without loading children.
    fn has_children(&self, item: &Self::Item) -> bool;
}

type ChildrenFn<T> = Box<dyn Fn(&T) -> Option<Vec<T>>>;
type HasChildrenFn<T> = Box<dyn Fn(&T) -> bool>;

/// [`ItemSource`] built from a top-level list and two closures.
pub struct FnSource<T> {
    items: Vec<T>,
    children: ChildrenFn<T>,
    has_children: HasChildrenFn<T>,
}

impl<T> FnSource<T> {
    pub fn new<C, H>(items: Vec<T>, children: C, has_children: H) -> Self
    where
        C: Fn(&T) -> Option<Vec<T>> + 'static,
        H: Fn(&T) -> bool + 'static,
    {
        Self {
            items,
            children: Box::new(children),
            has_children: Box::new(has_children),
        }
    }

    /// A flat list with no children anywhere.
    pub fn flat(items: Vec<T>) -> Self {
        Self::new(items, |_| None, |_| false)
    }
}

impl<T: Clone + Eq + Hash> ItemSource for FnSource<T> {
    type Item = T;

    fn top_level(&self) -> Vec<T> {
        self.items.clone()
    }

    fn children(&self, item: &T) -> Option<Vec<T>> {
        (self.children)(item)
    }

    fn has_children(&self, item: &T) -> bool {
        (self.has_children)(item)
    }
}

/// Measured size of a row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RowMetrics {
    pub height: f32,
    pub width: f32,
}

/// Everything a presenter needs to bind a row to a node.
pub struct RowBinding<'a, T> {
    pub item: &'a T,
    /// Indentation depth, 0 for top-level rows.
    pub depth: usize,
    pub is_expanded: bool,
    pub has_children: bool,
    pub is_current: bool,
    pub is_selected: bool,
}

/// Creates, binds and measures row content.
///
/// Row content is recycled: a content object created once is rebound to
/// many different items over its lifetime.
pub trait RowPresenter<T> {
    type Content;

    /// Creates fresh, unbound row content.
    fn create(&mut self) -> Self::Content;

    /// Binds content to an item and its row state.
    fn bind(&mut self, content: &mut Self::Content, binding: &RowBinding<'_, T>);

    /// Measures bound content.
    fn measure(&mut self, content: &Self::Content, binding: &RowBinding<'_, T>) -> RowMetrics;

    /// Height of the column header row, which sizes the row cache.
    fn header_height(&self) -> f32;
}

/// Presenter for hosts that draw rows themselves and only need fixed-height
/// slots from the engine.
#[derive(Debug, Clone, Copy)]
pub struct FixedHeightPresenter {
    pub row_height: f32,
    pub header_height: f32,
}

impl FixedHeightPresenter {
    pub fn new(row_height: f32) -> Self {
        Self {
            row_height,
            header_height: row_height,
        }
    }
}

impl<T> RowPresenter<T> for FixedHeightPresenter {
    type Content = ();

    fn create(&mut self) {}

    fn bind(&mut self, _content: &mut (), _binding: &RowBinding<'_, T>) {}

    fn measure(&mut self, _content: &(), _binding: &RowBinding<'_, T>) -> RowMetrics {
        RowMetrics {
            height: self.row_height,
            width: 0.0,
        }
    }

    fn header_height(&self) -> f32 {
        self.header_height
    }
}
