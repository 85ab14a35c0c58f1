//! Grid configuration.

use serde::{Deserialize, Serialize};

use crate::ui::virtual_scrolling::{OVER_CACHE_FACTOR, ROW_HEIGHT};

/// Tunables for a [`crate::TreeGrid`].
///
/// Missing fields take their defaults when deserializing, so a stored
/// config survives new fields being added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Row height used by the fixed-height presenter.
    pub row_height: f32,
    /// Header height, which sizes the row cache.
    pub header_height: f32,
    /// Row cache holds this many viewports' worth of rows.
    pub over_cache_factor: usize,
    /// Rows kept on screen across PageUp/PageDown.
    pub page_overlap_rows: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            row_height: ROW_HEIGHT,
            header_height: ROW_HEIGHT,
            over_cache_factor: OVER_CACHE_FACTOR,
            page_overlap_rows: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GridConfig::default();
        assert_eq!(config.row_height, 22.0);
        assert_eq!(config.header_height, 22.0);
        assert_eq!(config.over_cache_factor, 4);
        assert_eq!(config.page_overlap_rows, 0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: GridConfig = serde_json::from_str(r#"{"row_height": 30.0}"#).unwrap();
        assert_eq!(config.row_height, 30.0);
        assert_eq!(config.over_cache_factor, 4);
    }
}
