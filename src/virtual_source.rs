//! Synthetic hierarchy for demos, benchmarks and tests.
//!
//! Children are derived from the parent's id with a seeded RNG, so the
//! same seed always produces the same tree and nothing is generated until
//! the grid asks for it. Without a depth limit the hierarchy is unbounded.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::traits::ItemSource;

const DEFAULT_TOP_LEVEL: usize = 1_000;
const DEFAULT_MAX_DEPTH: usize = 5;
const DEFAULT_MAX_CHILDREN: usize = 10;

/// One generated item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualItem {
    pub id: u64,
    /// 0 for top-level items.
    pub depth: usize,
    /// Position among its siblings.
    pub index: usize,
}

impl fmt::Display for VirtualItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} (#{:016x})", self.index, self.id)
    }
}

/// Deterministic, lazily generated hierarchy.
#[derive(Debug, Clone)]
pub struct VirtualSource {
    top_level: usize,
    max_depth: Option<usize>,
    max_children: usize,
    seed: u64,
}

impl Default for VirtualSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSource {
    pub fn new() -> Self {
        Self {
            top_level: DEFAULT_TOP_LEVEL,
            max_depth: Some(DEFAULT_MAX_DEPTH),
            max_children: DEFAULT_MAX_CHILDREN,
            seed: 42,
        }
    }

    /// # Arguments
    /// * `top_level` - Number of top-level items
    /// * `max_depth` - Number of levels, top level included; `None` for unbounded
    /// * `max_children` - Upper bound on children per item
    /// * `seed` - RNG seed
    pub fn with_config(top_level: usize, max_depth: Option<usize>, max_children: usize, seed: u64) -> Self {
        Self {
            top_level,
            max_depth,
            max_children,
            seed,
        }
    }

    /// Number of children `item` gets, generated from its id.
    fn child_count(&self, item: &VirtualItem) -> usize {
        if self.max_depth.is_some_and(|max| item.depth + 1 >= max) || self.max_children == 0 {
            return 0;
        }
        let mut rng = StdRng::seed_from_u64(self.seed ^ item.id);
        rng.gen_range(0..=self.max_children)
    }

    fn child(parent: &VirtualItem, index: usize) -> VirtualItem {
        VirtualItem {
            id: mix(parent.id ^ mix(index as u64 + 1)),
            depth: parent.depth + 1,
            index,
        }
    }
}

/// splitmix64 finalizer.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

impl ItemSource for VirtualSource {
    type Item = VirtualItem;

    fn top_level(&self) -> Vec<VirtualItem> {
        (0..self.top_level)
            .map(|index| VirtualItem {
                id: mix(self.seed.wrapping_add(index as u64)),
                depth: 0,
                index,
            })
            .collect()
    }

    fn children(&self, item: &VirtualItem) -> Option<Vec<VirtualItem>> {
        let count = self.child_count(item);
        (count > 0).then(|| (0..count).map(|index| Self::child(item, index)).collect())
    }

    fn has_children(&self, item: &VirtualItem) -> bool {
        self.child_count(item) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_tree() {
        let a = VirtualSource::with_config(5, Some(4), 6, 7);
        let b = VirtualSource::with_config(5, Some(4), 6, 7);
        let top = a.top_level();
        assert_eq!(top, b.top_level());
        for item in &top {
            assert_eq!(a.children(item), b.children(item));
            assert_eq!(a.has_children(item), a.children(item).is_some());
        }
    }

    #[test]
    fn test_depth_limit() {
        let source = VirtualSource::with_config(3, Some(1), 6, 1);
        for item in source.top_level() {
            assert!(!source.has_children(&item));
            assert_eq!(source.children(&item), None);
        }
    }

    #[test]
    fn test_unbounded_keeps_going() {
        let source = VirtualSource::with_config(50, None, 3, 11);
        let mut item = source
            .top_level()
            .into_iter()
            .find(|item| source.has_children(item))
            .unwrap();
        // Follow first children down; at least a few levels exist.
        for _ in 0..3 {
            match source.children(&item) {
                Some(children) => item = children[0].clone(),
                None => break,
            }
        }
        assert!(item.depth >= 1);
    }
}
