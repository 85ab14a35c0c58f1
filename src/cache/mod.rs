//! Caching of materialized rows across layout passes.

pub mod row_cache;

// Re-export commonly used types
pub use row_cache::{RowCache, Row, RowState, CacheStats};
