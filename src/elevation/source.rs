//! Raster backings behind the elevation provider

use crate::core::types::Result;
use crate::elevation::cache::CacheStats;

/// A raster of normalized elevation samples addressed in pixels.
///
/// Sampling may fail (missing or corrupt tile); the provider degrades to the
/// next source when it does.
pub trait ElevationSource: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Full-resolution raster size in pixels
    fn dimensions(&self) -> (u32, u32);

    /// Normalized sample at a full-resolution pixel (must be in range)
    fn sample(&mut self, px: u32, py: u32) -> Result<f32>;

    /// Number of precomputed reduced levels
    fn overview_levels(&self) -> u32 {
        0
    }

    /// Raster size of overview `level` (level 0 is full resolution)
    fn overview_dimensions(&self, level: u32) -> (u32, u32) {
        let (w, h) = self.dimensions();
        let step = 1u32 << level.min(31);
        (w.div_ceil(step).max(1), h.div_ceil(step).max(1))
    }

    /// Sample of overview `level`. Without precomputed overviews this reads
    /// every `2^level`-th full-resolution pixel.
    fn sample_overview(&mut self, level: u32, px: u32, py: u32) -> Result<f32> {
        let (w, h) = self.dimensions();
        let step = 1u32 << level.min(31);
        self.sample(
            px.saturating_mul(step).min(w - 1),
            py.saturating_mul(step).min(h - 1),
        )
    }

    /// Whether samples come from a pre-sliced tileset
    fn is_tiled(&self) -> bool {
        false
    }

    fn cache_stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
