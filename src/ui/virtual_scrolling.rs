//! Virtual scrolling constants and sizing helpers.
//!
//! Only rows that intersect the viewport are laid out; the row cache keeps
//! a few viewports' worth of extra rows around so small scrolls are cheap.

/// Default row height in pixels.
pub const ROW_HEIGHT: f32 = 22.0;

/// Multiplier applied to the rows needed for one viewport when sizing the
/// row cache.
pub const OVER_CACHE_FACTOR: usize = 4;

/// Row cache capacity for a viewport: enough header-sized rows to cover
/// it, times the over-cache factor.
///
/// # Arguments
/// * `viewport_height` - Available height in pixels
/// * `header_height` - Height of the header row, used as the row size estimate
/// * `over_cache_factor` - Multiplier for slack beyond one viewport
pub fn row_cache_capacity(viewport_height: f32, header_height: f32, over_cache_factor: usize) -> usize {
    if viewport_height <= 0.0 || header_height <= 0.0 {
        return 0;
    }
    (viewport_height / header_height).ceil() as usize * over_cache_factor.max(1)
}
