//! Terrain engine configuration
//!
//! One [`TerrainConfig`] is shared by every subsystem. It is loaded from JSON
//! (missing fields take their defaults) and validated once before any
//! component is built; a bad config is the one error class that fails loudly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Deepest point of the global raster (Mariana Trench), meters.
pub const MARIANA_DEPTH: f32 = -10994.0;

/// Highest point of the global raster (Everest), meters.
pub const EVEREST_HEIGHT: f32 = 8849.0;

/// Mapping between normalized elevation `[0, 1]` and meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElevationRange {
    pub min: f32,
    pub max: f32,
}

impl ElevationRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Full planetary range.
    pub fn planetary() -> Self {
        Self::new(MARIANA_DEPTH, EVEREST_HEIGHT)
    }

    /// Vertical extent in meters.
    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// `lerp(min, max, normalized)`
    pub fn to_meters(&self, normalized: f32) -> f32 {
        self.min + (self.max - self.min) * normalized
    }

    /// Inverse of [`Self::to_meters`], not clamped.
    pub fn to_normalized(&self, meters: f32) -> f32 {
        (meters - self.min) / self.span()
    }
}

impl Default for ElevationRange {
    fn default() -> Self {
        Self::planetary()
    }
}

/// Elevation and slope thresholds for biome classification (meters / rise-over-run).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomeThresholds {
    /// Below `sea_level - deep_water_depth` is deep water.
    pub deep_water_depth: f32,
    /// `[sea_level, sea_level + beach_height)` is beach.
    pub beach_height: f32,
    /// Slope (rise over run) above which land is cliff.
    pub cliff_slope: f32,
    /// Height above sea level where grass gives way to rock.
    pub rock_height: f32,
    /// Height above sea level where rock gives way to snow.
    pub snow_height: f32,
}

impl Default for BiomeThresholds {
    fn default() -> Self {
        Self {
            deep_water_depth: 200.0,
            beach_height: 10.0,
            cliff_slope: 0.7,
            rock_height: 1200.0,
            snow_height: 2500.0,
        }
    }
}

/// Complete configuration surface of the terrain core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Meters per chunk edge.
    pub chunk_size: f32,
    /// Samples per chunk edge for data and LOD 0 meshes. Must be `2^k + 1`.
    pub heightmap_resolution: u32,
    /// Samples per chunk edge for collision heightfields.
    pub collision_resolution: u32,
    /// Chunks whose centre is within this distance are kept resident (meters).
    pub load_distance: f32,
    /// Resident chunks beyond this distance are unloaded. Must exceed `load_distance`.
    pub unload_distance: f32,
    /// Memory cap for resident chunk data (MiB).
    pub max_cache_memory_mb: f32,
    /// Maximum chunk loads completed per tick.
    pub max_chunks_per_frame: usize,
    /// Wall-clock budget for loads per tick (ms).
    pub max_load_time_ms: f32,
    /// Maximum background builds in flight.
    pub max_concurrent_loads: usize,
    /// Attempts before a chunk is marked permanently failed.
    pub max_load_attempts: u32,
    /// Ticks to wait before retrying a failed chunk.
    pub retry_delay_ticks: u64,
    /// Number of mesh LOD levels.
    pub lod_levels: u32,
    /// Distance at which LOD 0 ends (meters).
    pub base_lod_distance: f32,
    /// Each LOD band is this much wider than the previous one.
    pub lod_distance_multiplier: f32,
    /// Depth of the seam skirt hanging below each chunk edge (meters).
    pub skirt_depth: f32,
    /// Seed for every noise function.
    pub seed: u32,
    /// Micro-relief noise frequency (cycles per meter).
    pub detail_scale: f32,
    /// Weight of the micro-relief layer.
    pub detail_contribution: f32,
    /// Detail amplitude at zero distance (normalized elevation units).
    pub detail_max_amplitude: f32,
    /// Distance over which detail amplitude decays by `1/e` (meters).
    pub detail_falloff_distance: f32,
    /// Relief below this fraction of the full range counts as flat.
    pub flat_terrain_threshold: f32,
    /// Detail amplitude used inside flat chunks (normalized elevation units).
    pub flat_terrain_amplitude: f32,
    /// Lower bound of the vertical scaling range (meters).
    pub min_elevation: f32,
    /// Upper bound of the vertical scaling range (meters).
    pub max_elevation: f32,
    /// Ground size of one full-resolution raster pixel (meters).
    pub meters_per_pixel: f32,
    /// Display density at which the first overview level becomes sufficient.
    pub zoom_lod_base_mpp: f32,
    /// Memory budget for the elevation tile cache (MiB).
    pub tile_cache_memory_mb: f32,
    /// Answer height queries outside resident chunks from the provider.
    pub fallback_to_provider: bool,
    /// Candidate positions tried by the spawn search.
    pub max_spawn_attempts: u32,
    /// Biome classification thresholds.
    pub biome: BiomeThresholds,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512.0,
            heightmap_resolution: 129,
            collision_resolution: 33,
            load_distance: 1024.0,
            unload_distance: 2048.0,
            max_cache_memory_mb: 256.0,
            max_chunks_per_frame: 4,
            max_load_time_ms: 8.0,
            max_concurrent_loads: 4,
            max_load_attempts: 3,
            retry_delay_ticks: 30,
            lod_levels: 4,
            base_lod_distance: 512.0,
            lod_distance_multiplier: 2.0,
            skirt_depth: 50.0,
            seed: 12345,
            detail_scale: 0.02,
            detail_contribution: 1.0,
            detail_max_amplitude: 0.0005,
            detail_falloff_distance: 2048.0,
            flat_terrain_threshold: 0.0005,
            flat_terrain_amplitude: 0.0015,
            min_elevation: MARIANA_DEPTH,
            max_elevation: EVEREST_HEIGHT,
            meters_per_pixel: 1852.0,
            zoom_lod_base_mpp: 100.0,
            tile_cache_memory_mb: 128.0,
            fallback_to_provider: true,
            max_spawn_attempts: 64,
            biome: BiomeThresholds::default(),
        }
    }
}

impl TerrainConfig {
    /// Vertical scaling range.
    pub fn elevation_range(&self) -> ElevationRange {
        ElevationRange::new(self.min_elevation, self.max_elevation)
    }

    /// Meters between adjacent heightmap samples.
    pub fn sample_spacing(&self) -> f32 {
        self.chunk_size / (self.heightmap_resolution - 1) as f32
    }

    /// Load from a JSON file. Missing fields take defaults; the result is validated.
    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations that indicate a programming or config mistake.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(Error::InvalidConfiguration(msg))
        }

        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return invalid(format!("chunk_size must be positive, got {}", self.chunk_size));
        }
        if !(self.load_distance.is_finite() && self.load_distance >= 0.0) {
            return invalid(format!("load_distance must be non-negative, got {}", self.load_distance));
        }
        if !(self.unload_distance > self.load_distance) {
            return invalid(format!(
                "unload_distance ({}) must be greater than load_distance ({})",
                self.unload_distance, self.load_distance
            ));
        }
        if self.heightmap_resolution < 3 || !(self.heightmap_resolution - 1).is_power_of_two() {
            return invalid(format!(
                "heightmap_resolution must be 2^k + 1 and at least 3, got {}",
                self.heightmap_resolution
            ));
        }
        if self.collision_resolution < 2 {
            return invalid(format!(
                "collision_resolution must be at least 2, got {}",
                self.collision_resolution
            ));
        }
        if self.lod_levels == 0 {
            return invalid("lod_levels must be at least 1".to_string());
        }
        let quads = self.heightmap_resolution - 1;
        if self.lod_levels > quads.trailing_zeros() + 1 {
            return invalid(format!(
                "lod_levels ({}) exceeds what a {}-sample heightmap can decimate to ({})",
                self.lod_levels,
                self.heightmap_resolution,
                quads.trailing_zeros() + 1
            ));
        }
        if !(self.base_lod_distance > 0.0) {
            return invalid(format!("base_lod_distance must be positive, got {}", self.base_lod_distance));
        }
        if !(self.lod_distance_multiplier > 1.0) {
            return invalid(format!(
                "lod_distance_multiplier must be greater than 1, got {}",
                self.lod_distance_multiplier
            ));
        }
        if !(self.max_cache_memory_mb > 0.0) {
            return invalid(format!("max_cache_memory_mb must be positive, got {}", self.max_cache_memory_mb));
        }
        if self.max_chunks_per_frame == 0 {
            return invalid("max_chunks_per_frame must be at least 1".to_string());
        }
        if !(self.max_load_time_ms > 0.0) {
            return invalid(format!("max_load_time_ms must be positive, got {}", self.max_load_time_ms));
        }
        if self.max_concurrent_loads == 0 {
            return invalid("max_concurrent_loads must be at least 1".to_string());
        }
        if self.max_load_attempts == 0 {
            return invalid("max_load_attempts must be at least 1".to_string());
        }
        if !(self.min_elevation < self.max_elevation) {
            return invalid(format!(
                "min_elevation ({}) must be below max_elevation ({})",
                self.min_elevation, self.max_elevation
            ));
        }
        if !(self.meters_per_pixel > 0.0) {
            return invalid(format!("meters_per_pixel must be positive, got {}", self.meters_per_pixel));
        }
        if !(self.zoom_lod_base_mpp > 0.0) {
            return invalid(format!("zoom_lod_base_mpp must be positive, got {}", self.zoom_lod_base_mpp));
        }
        if !(self.detail_falloff_distance > 0.0) {
            return invalid(format!(
                "detail_falloff_distance must be positive, got {}",
                self.detail_falloff_distance
            ));
        }
        if self.detail_max_amplitude < 0.0 || self.flat_terrain_amplitude < 0.0 {
            return invalid("detail amplitudes must be non-negative".to_string());
        }
        if self.skirt_depth < 0.0 {
            return invalid(format!("skirt_depth must be non-negative, got {}", self.skirt_depth));
        }
        if self.biome.snow_height < self.biome.rock_height {
            return invalid("biome.snow_height must not be below biome.rock_height".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        TerrainConfig::default().validate().unwrap();
    }

    #[test]
    fn test_unload_must_exceed_load() {
        let config = TerrainConfig {
            load_distance: 1024.0,
            unload_distance: 1024.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unload_distance"));
    }

    #[test]
    fn test_negative_chunk_size_rejected() {
        let config = TerrainConfig {
            chunk_size: -1.0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_resolution_must_be_power_of_two_plus_one() {
        let config = TerrainConfig {
            heightmap_resolution: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TerrainConfig {
            heightmap_resolution: 65,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_too_many_lod_levels_rejected() {
        let config = TerrainConfig {
            heightmap_resolution: 9, // 8 quads: LOD 0..=3
            lod_levels: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TerrainConfig {
            heightmap_resolution: 9,
            lod_levels: 4,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lod_multiplier_must_grow() {
        let config = TerrainConfig {
            lod_distance_multiplier: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_elevation_range_roundtrip() {
        let range = ElevationRange::planetary();
        assert_eq!(range.to_meters(0.0), MARIANA_DEPTH);
        assert_eq!(range.to_meters(1.0), EVEREST_HEIGHT);
        let n = range.to_normalized(0.0);
        assert!(range.to_meters(n).abs() < 1e-3);
    }

    #[test]
    fn test_json_partial_fields_use_defaults() {
        let config: TerrainConfig = serde_json::from_str(r#"{ "chunk_size": 256.0 }"#).unwrap();
        assert_eq!(config.chunk_size, 256.0);
        assert_eq!(config.heightmap_resolution, 129);
        assert_eq!(config.biome, BiomeThresholds::default());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrain.json");
        let config = TerrainConfig {
            load_distance: 900.0,
            ..Default::default()
        };
        config.save_json(&path).unwrap();
        let loaded = TerrainConfig::load_json(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_json_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "load_distance": 5000.0, "unload_distance": 100.0 }"#).unwrap();
        assert!(TerrainConfig::load_json(&path).unwrap_err().is_configuration());
    }
}
