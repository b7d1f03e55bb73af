//! Elevation provider: the single source of raw terrain height
//!
//! The provider hides which backing answers a query. It tries each raster
//! source in order (tileset, then source image) and finally the procedural
//! function, so every query returns some height. World space maps onto the
//! raster with the world origin at the raster centre, `x` along columns and
//! `z` along rows; positions outside the raster clamp to its edge.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::types::{DVec2, Result};
use crate::elevation::cache::CacheStats;
use crate::elevation::procedural::{ProceduralElevation, ProceduralParams};
use crate::elevation::source::ElevationSource;
use crate::elevation::source_image::SourceImageElevation;
use crate::elevation::tiled::TiledElevationProvider;
use crate::terrain::heightmap::Heightmap;

/// Raster size assumed when no raster source is available
pub const DEFAULT_RASTER_SIZE: (u32, u32) = (21600, 10800);

/// Zoom levels offered when the backing has no precomputed overviews
pub const DEFAULT_ZOOM_LEVELS: u32 = 3;

/// Largest edge resolution `extract_region_lod` will produce
pub const MAX_REGION_RESOLUTION: usize = 2048;

/// Provider shared between the streaming loop, loader workers and collision
pub type SharedElevation = Arc<Mutex<ElevationDataProvider>>;

/// Axis-aligned world rectangle in the horizontal plane (`y` holds world z)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldRect {
    pub min: DVec2,
    pub max: DVec2,
}

impl WorldRect {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: DVec2, size: DVec2) -> Self {
        Self::new(center - size * 0.5, center + size * 0.5)
    }

    pub fn size(&self) -> DVec2 {
        self.max - self.min
    }

    /// Coordinate of sample `i` of `n` along one axis; the last sample is
    /// exactly `max` so rectangles sharing an edge share its samples.
    fn axis_sample(min: f64, max: f64, i: usize, n: usize) -> f64 {
        if i + 1 >= n {
            max
        } else {
            min + (max - min) * i as f64 / (n - 1) as f64
        }
    }
}

/// Front door for all elevation queries
pub struct ElevationDataProvider {
    sources: Vec<Box<dyn ElevationSource>>,
    procedural: ProceduralElevation,
    meters_per_pixel: f64,
    /// World size covered by the full raster
    extent: DVec2,
    zoom_base_mpp: f32,
    warned: HashSet<String>,
    fallback_samples: u64,
}

impl ElevationDataProvider {
    /// Build over explicit sources, tried in order before the procedural fallback
    pub fn new(config: &TerrainConfig, sources: Vec<Box<dyn ElevationSource>>) -> Result<Self> {
        config.validate()?;
        let (w, h) = sources.first().map_or(DEFAULT_RASTER_SIZE, |s| s.dimensions());
        if w == 0 || h == 0 {
            return Err(Error::DataUnavailable("elevation raster has no pixels".to_string()));
        }
        let mpp = config.meters_per_pixel as f64;

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        log::info!(
            "Elevation provider: {} over {}x{} px at {} m/px",
            if names.is_empty() { "procedural only".to_string() } else { names.join(" -> ") + " -> procedural" },
            w,
            h,
            mpp
        );

        Ok(Self {
            sources,
            procedural: ProceduralElevation::new(ProceduralParams::from_config(config)),
            meters_per_pixel: mpp,
            extent: DVec2::new(w as f64 * mpp, h as f64 * mpp),
            zoom_base_mpp: config.zoom_lod_base_mpp,
            warned: HashSet::new(),
            fallback_samples: 0,
        })
    }

    /// Provider answering every query procedurally
    pub fn procedural_only(config: &TerrainConfig) -> Result<Self> {
        Self::new(config, Vec::new())
    }

    /// Open whichever backings exist.
    ///
    /// Missing or unreadable backings are logged and skipped, so the chain
    /// always ends in procedural terrain.
    ///
    /// # Arguments
    /// * `config` - Terrain configuration (validated here)
    /// * `tileset_dir` - Directory holding `tileset.json`, tried first
    /// * `source_image` - Single elevation image, tried second
    ///
    /// # Returns
    /// The provider, or `InvalidConfiguration` for a bad config
    pub fn open(config: &TerrainConfig, tileset_dir: Option<&Path>, source_image: Option<&Path>) -> Result<Self> {
        let mut sources: Vec<Box<dyn ElevationSource>> = Vec::new();

        if let Some(dir) = tileset_dir {
            match TiledElevationProvider::open(dir, config.tile_cache_memory_mb) {
                Ok(tiles) => sources.push(Box::new(tiles)),
                Err(e) => log::warn!("Tileset {} unavailable, falling back: {}", dir.display(), e),
            }
        }
        if let Some(path) = source_image {
            match SourceImageElevation::open(path) {
                Ok(image) => sources.push(Box::new(image)),
                Err(e) => log::warn!("Source image {} unavailable, falling back: {}", path.display(), e),
            }
        }
        if sources.is_empty() {
            log::warn!("No elevation raster available, using procedural terrain");
        }
        Self::new(config, sources)
    }

    pub fn into_shared(self) -> SharedElevation {
        Arc::new(Mutex::new(self))
    }

    /// World size covered by the raster (x, z)
    pub fn world_extent(&self) -> DVec2 {
        self.extent
    }

    pub fn meters_per_pixel(&self) -> f64 {
        self.meters_per_pixel
    }

    /// Whether a pre-sliced tileset backs this provider
    pub fn has_tiles(&self) -> bool {
        self.sources.iter().any(|s| s.is_tiled())
    }

    /// Whether any raster source (not just the procedural fallback) exists
    pub fn has_raster(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.sources
            .iter()
            .find(|s| s.is_tiled())
            .map(|s| s.cache_stats())
            .unwrap_or_default()
    }

    /// Samples answered by the procedural fallback after a raster failure
    pub fn fallback_samples(&self) -> u64 {
        self.fallback_samples
    }

    /// Normalized elevation at a world position
    ///
    /// Positions outside the raster clamp to its edge. A failing raster
    /// sample is answered by the procedural fallback.
    ///
    /// # Arguments
    /// * `x`, `z` - World position in meters
    ///
    /// # Returns
    /// Elevation in `[0, 1]` of the configured range
    pub fn get_elevation(&mut self, x: f64, z: f64) -> f32 {
        self.elevation_at_level(0, x, z)
    }

    /// Normalized elevation from the raster sources only.
    ///
    /// Errors with `DataUnavailable` when no raster can answer, letting
    /// callers tell real data from the procedural fallback.
    pub fn try_get_elevation(&mut self, x: f64, z: f64) -> Result<f32> {
        let mut last_error = Error::DataUnavailable("no elevation raster configured".to_string());
        for source in self.sources.iter_mut() {
            match sample_source(source.as_mut(), self.extent, 0, x, z) {
                Ok(v) => return Ok(v),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Sample a rectangle into a square heightmap
    ///
    /// # Arguments
    /// * `bounds` - World rectangle; its corners are the outer samples
    /// * `resolution` - Samples per edge
    ///
    /// # Returns
    /// A `resolution x resolution` heightmap whose spacing is the x-axis
    /// sample distance
    pub fn extract_region(&mut self, bounds: WorldRect, resolution: usize) -> Heightmap {
        self.extract_at_level(bounds, resolution, 0)
    }

    /// Sample a rectangle from overview `lod_level`, at that level's own
    /// pixel density (`1 / 2^lod` of full resolution).
    pub fn extract_region_lod(&mut self, bounds: WorldRect, lod_level: u32) -> Heightmap {
        let level_mpp = self.meters_per_pixel * (1u64 << lod_level.min(31)) as f64;
        let pixels = (bounds.size().x.abs() / level_mpp).ceil() as usize;
        let resolution = (pixels + 1).clamp(2, MAX_REGION_RESOLUTION);
        self.extract_at_level(bounds, resolution, lod_level)
    }

    /// Coarsest LOD whose pixels are still finer than the display density
    ///
    /// # Arguments
    /// * `meters_per_pixel` - Display density of the map view
    ///
    /// # Returns
    /// Overview level: 0 below `zoom_lod_base_mpp`, then one level per
    /// doubling, capped at the deepest overview available
    ///
    /// # Example
    /// ```
    /// use bathy::core::TerrainConfig;
    /// use bathy::elevation::ElevationDataProvider;
    ///
    /// let provider = ElevationDataProvider::procedural_only(&TerrainConfig::default()).unwrap();
    /// assert!(provider.get_lod_for_zoom(1.0) <= provider.get_lod_for_zoom(1000.0));
    /// ```
    pub fn get_lod_for_zoom(&self, meters_per_pixel: f32) -> u32 {
        if !(meters_per_pixel >= self.zoom_base_mpp) {
            return 0;
        }
        let levels = (meters_per_pixel / self.zoom_base_mpp).log2().floor() as u32 + 1;
        levels.min(self.max_zoom_level())
    }

    fn max_zoom_level(&self) -> u32 {
        match self.sources.first().map(|s| s.overview_levels()) {
            Some(levels) if levels > 0 => levels,
            _ => DEFAULT_ZOOM_LEVELS,
        }
    }

    /// Sample a grid at world positions `(first + index) * spacing`.
    ///
    /// Chunks address samples by global index so neighbours evaluate their
    /// shared edge at bit-identical positions.
    pub fn sample_grid(
        &mut self,
        first_x: i64,
        first_z: i64,
        spacing: f64,
        width: usize,
        height: usize,
    ) -> Heightmap {
        Heightmap::from_fn(width, height, spacing as f32, |i, j| {
            let x = (first_x + i as i64) as f64 * spacing;
            let z = (first_z + j as i64) as f64 * spacing;
            self.get_elevation(x, z)
        })
    }

    fn extract_at_level(&mut self, bounds: WorldRect, resolution: usize, level: u32) -> Heightmap {
        let n = resolution.max(2);
        let spacing = bounds.size().x / (n - 1) as f64;
        Heightmap::from_fn(n, n, spacing as f32, |i, j| {
            let x = WorldRect::axis_sample(bounds.min.x, bounds.max.x, i, n);
            let z = WorldRect::axis_sample(bounds.min.y, bounds.max.y, j, n);
            self.elevation_at_level(level, x, z)
        })
    }

    fn elevation_at_level(&mut self, level: u32, x: f64, z: f64) -> f32 {
        for source in self.sources.iter_mut() {
            match sample_source(source.as_mut(), self.extent, level, x, z) {
                Ok(v) => return v,
                Err(e) => {
                    let message = format!("{}: {}", source.name(), e);
                    if self.warned.insert(message.clone()) {
                        log::warn!("Elevation source failed, degrading: {}", message);
                    }
                }
            }
        }
        if !self.sources.is_empty() {
            self.fallback_samples += 1;
        }
        let half = self.extent * 0.5;
        self.procedural.height_at(x.clamp(-half.x, half.x), z.clamp(-half.y, half.y))
    }
}

/// Bilinear sample of one source at a world position, clamped to the raster
fn sample_source(source: &mut dyn ElevationSource, extent: DVec2, level: u32, x: f64, z: f64) -> Result<f32> {
    let (w, h) = source.overview_dimensions(level);
    let u = (x / extent.x + 0.5).clamp(0.0, 1.0);
    let v = (z / extent.y + 0.5).clamp(0.0, 1.0);
    let fx = u * (w.saturating_sub(1)) as f64;
    let fy = v * (h.saturating_sub(1)) as f64;

    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(w.saturating_sub(1));
    let y1 = (y0 + 1).min(h.saturating_sub(1));
    let tx = (fx - x0 as f64) as f32;
    let ty = (fy - y0 as f64) as f32;

    let s00 = source.sample_overview(level, x0, y0)?;
    if tx == 0.0 && ty == 0.0 {
        return Ok(s00);
    }
    let s10 = source.sample_overview(level, x1, y0)?;
    let s01 = source.sample_overview(level, x0, y1)?;
    let s11 = source.sample_overview(level, x1, y1)?;

    let top = s00 * (1.0 - tx) + s10 * tx;
    let bottom = s01 * (1.0 - tx) + s11 * tx;
    let value = top * (1.0 - ty) + bottom * ty;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::DataUnavailable(format!("non-finite sample near pixel ({}, {})", x0, y0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::tileset::{Raster, TilesetWriter};

    /// 3x3 raster with value = column / 2
    struct Columns;

    impl ElevationSource for Columns {
        fn name(&self) -> &str {
            "columns"
        }

        fn dimensions(&self) -> (u32, u32) {
            (3, 3)
        }

        fn sample(&mut self, px: u32, _py: u32) -> Result<f32> {
            Ok(px as f32 / 2.0)
        }
    }

    struct Broken;

    impl ElevationSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> (u32, u32) {
            (3, 3)
        }

        fn sample(&mut self, _px: u32, _py: u32) -> Result<f32> {
            Err(Error::DataUnavailable("corrupt tile".to_string()))
        }
    }

    fn config() -> TerrainConfig {
        TerrainConfig {
            meters_per_pixel: 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_world_origin_is_raster_center() {
        let mut p = ElevationDataProvider::new(&config(), vec![Box::new(Columns)]).unwrap();
        assert_eq!(p.world_extent(), DVec2::new(300.0, 300.0));
        assert_eq!(p.get_elevation(0.0, 0.0), 0.5);
        assert_eq!(p.get_elevation(-150.0, 0.0), 0.0);
        assert_eq!(p.get_elevation(75.0, 0.0), 0.75);
    }

    #[test]
    fn test_out_of_bounds_clamps() {
        let mut p = ElevationDataProvider::new(&config(), vec![Box::new(Columns)]).unwrap();
        assert_eq!(p.get_elevation(1.0e9, 0.0), 1.0);
        assert_eq!(p.get_elevation(-1.0e9, 5.0e8), 0.0);
    }

    #[test]
    fn test_falls_back_past_broken_source() {
        let mut p = ElevationDataProvider::new(&config(), vec![Box::new(Broken), Box::new(Columns)]).unwrap();
        assert_eq!(p.get_elevation(0.0, 0.0), 0.5);
        assert_eq!(p.fallback_samples(), 0);
    }

    #[test]
    fn test_procedural_when_everything_fails() {
        let mut p = ElevationDataProvider::new(&config(), vec![Box::new(Broken)]).unwrap();
        let h = p.get_elevation(10.0, 20.0);
        assert!((0.0..=1.0).contains(&h));
        assert_eq!(p.fallback_samples(), 1);
        assert!(p.try_get_elevation(10.0, 20.0).is_err());
    }

    #[test]
    fn test_procedural_only_is_total() {
        let mut p = ElevationDataProvider::procedural_only(&config()).unwrap();
        assert!(!p.has_raster());
        assert!(!p.has_tiles());
        let h = p.get_elevation(1.0e12, -1.0e12);
        assert!(h.is_finite());
        assert!(matches!(p.try_get_elevation(0.0, 0.0), Err(Error::DataUnavailable(_))));
    }

    #[test]
    fn test_open_missing_paths_degrades() {
        let p = ElevationDataProvider::open(
            &config(),
            Some(Path::new("/nonexistent/tiles")),
            Some(Path::new("/nonexistent/world.png")),
        )
        .unwrap();
        assert!(!p.has_raster());
    }

    #[test]
    fn test_extract_region_shares_edges() {
        let mut p = ElevationDataProvider::procedural_only(&config()).unwrap();
        let left = p.extract_region(WorldRect::new(DVec2::new(0.0, 0.0), DVec2::new(333.3, 333.3)), 9);
        let right = p.extract_region(WorldRect::new(DVec2::new(333.3, 0.0), DVec2::new(666.6, 333.3)), 9);
        for z in 0..9 {
            assert_eq!(left.get(8, z), right.get(0, z));
        }
    }

    #[test]
    fn test_lod_for_zoom_monotonic() {
        let p = ElevationDataProvider::procedural_only(&config()).unwrap();
        assert_eq!(p.get_lod_for_zoom(5.0), 0);
        assert!(p.get_lod_for_zoom(5.0) < p.get_lod_for_zoom(500.0));
        let mut last = 0;
        for mpp in [1.0, 50.0, 100.0, 150.0, 200.0, 400.0, 800.0, 1.0e6] {
            let lod = p.get_lod_for_zoom(mpp);
            assert!(lod >= last);
            last = lod;
        }
        assert_eq!(last, DEFAULT_ZOOM_LEVELS);
    }

    #[test]
    fn test_tileset_backed_provider() {
        let dir = tempfile::tempdir().unwrap();
        let samples = (0..16u32).flat_map(|y| (0..16u32).map(move |x| (x + y) as f32)).collect();
        TilesetWriter::write(&Raster::new(16, 16, samples).unwrap(), dir.path(), 8, 2).unwrap();

        let mut p = ElevationDataProvider::open(&config(), Some(dir.path()), None).unwrap();
        assert!(p.has_tiles());
        assert_eq!(p.get_lod_for_zoom(1.0e6), 2);

        let full = p.extract_region(WorldRect::from_center(DVec2::ZERO, DVec2::splat(1200.0)), 13);
        let coarse = p.extract_region_lod(WorldRect::from_center(DVec2::ZERO, DVec2::splat(1200.0)), 2);
        assert_eq!(full.width(), 13);
        assert_eq!(coarse.width(), 4);
        assert!(p.get_cache_stats().cached_tiles > 0);
        assert!(p.try_get_elevation(0.0, 0.0).is_ok());
    }
}
