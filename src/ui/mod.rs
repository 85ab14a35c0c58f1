//! Viewport subsystem
//!
//! This module decides what the grid shows:
//! - Virtual scrolling (row cache sizing constants)
//! - Viewport layout (top-down and bottom-up passes, deferred invalidation)
//! - Navigation (keyboard commands resolved to targets and scrolls)

pub mod virtual_scrolling;
pub mod viewport_layout;
pub mod navigation;

pub use viewport_layout::{ViewportLayoutEngine, LayoutMode, InvalidationKind, LayoutOutcome, Placement};
pub use navigation::{Navigation, NavigationPlan, NavigationTarget, ScrollRequest};
