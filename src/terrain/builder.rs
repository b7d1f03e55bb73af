//! Builds complete chunk data from the elevation provider

use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::elevation::SharedElevation;
use crate::terrain::biome::BiomeDetector;
use crate::terrain::chunk::{ChunkCoord, ChunkData};
use crate::terrain::detail::{DetailParams, ProceduralDetailGenerator};

/// Anything that can produce the data of one chunk.
///
/// Called from the streaming loop or from loader worker threads.
pub trait ChunkSource: Send + Sync {
    fn build_chunk(&self, coord: ChunkCoord, sea_level_meters: f32) -> Result<ChunkData>;
}

/// Heightmap, detail, biome and bump generation for one chunk.
///
/// Samples are taken with a one-sample apron so slopes and normals on the
/// chunk border see the neighbouring terrain, then cropped to the chunk.
#[derive(Clone)]
pub struct ChunkBuilder {
    elevation: SharedElevation,
    detail: ProceduralDetailGenerator,
    biomes: BiomeDetector,
    chunk_size: f32,
    resolution: usize,
}

impl ChunkBuilder {
    pub fn new(config: &TerrainConfig, elevation: SharedElevation) -> Result<Self> {
        config.validate()?;
        let range = config.elevation_range();
        Ok(Self {
            elevation,
            detail: ProceduralDetailGenerator::new(DetailParams::from_config(config), range),
            biomes: BiomeDetector::new(config.biome.clone(), range),
            chunk_size: config.chunk_size,
            resolution: config.heightmap_resolution as usize,
        })
    }

    pub fn detail(&self) -> &ProceduralDetailGenerator {
        &self.detail
    }

    pub fn biome_detector(&self) -> &BiomeDetector {
        &self.biomes
    }

    pub fn elevation(&self) -> &SharedElevation {
        &self.elevation
    }

    /// Build the full data of `coord` with biomes classified at `sea_level_meters`
    pub fn build(&self, coord: ChunkCoord, sea_level_meters: f32) -> Result<ChunkData> {
        let res = self.resolution;
        let quads = (res - 1) as i64;
        let spacing = self.chunk_size as f64 / quads as f64;

        let padded_base = {
            let mut provider = self
                .elevation
                .lock()
                .map_err(|_| Error::load_failure(coord, "elevation provider lock poisoned"))?;
            provider.sample_grid(
                coord.x as i64 * quads - 1,
                coord.z as i64 * quads - 1,
                spacing,
                res + 2,
                res + 2,
            )
        };
        if let Some(bad) = padded_base.samples().iter().find(|h| !h.is_finite()) {
            return Err(Error::load_failure(coord, format!("non-finite elevation sample {}", bad)));
        }

        let (padded, flat) = self.detail.generate_detail_padded(&padded_base, coord, self.chunk_size, 1);
        let biome_map = self.biomes.detect_biomes(&padded, sea_level_meters).crop(1, 1, res, res);
        let bump_map = self.detail.generate_bump_map(&padded).crop(1, 1, res, res);

        log::trace!("Built chunk {} (flat: {})", coord, flat);
        Ok(ChunkData {
            coord,
            base_heightmap: padded_base.crop(1, 1, res, res),
            heightmap: padded.crop(1, 1, res, res),
            padded_heightmap: padded,
            biome_map,
            bump_map,
            flat,
            sea_level_meters,
        })
    }

    /// Recompute the biome map of existing data for a new sea level
    pub fn reclassify(&self, data: &mut ChunkData, sea_level_meters: f32) {
        let res = data.heightmap.width();
        data.biome_map = self
            .biomes
            .detect_biomes(&data.padded_heightmap, sea_level_meters)
            .crop(1, 1, res, res);
        data.sea_level_meters = sea_level_meters;
    }
}

impl ChunkSource for ChunkBuilder {
    fn build_chunk(&self, coord: ChunkCoord, sea_level_meters: f32) -> Result<ChunkData> {
        self.build(coord, sea_level_meters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::ElevationDataProvider;
    use crate::terrain::biome::Biome;

    fn small_config() -> TerrainConfig {
        TerrainConfig {
            heightmap_resolution: 17,
            lod_levels: 3,
            ..Default::default()
        }
    }

    fn builder(config: &TerrainConfig) -> ChunkBuilder {
        let provider = ElevationDataProvider::procedural_only(config).unwrap().into_shared();
        ChunkBuilder::new(config, provider).unwrap()
    }

    #[test]
    fn test_build_dimensions() {
        let config = small_config();
        let data = builder(&config).build(ChunkCoord::new(0, 0), 0.0).unwrap();
        assert_eq!(data.heightmap.width(), 17);
        assert_eq!(data.base_heightmap.height(), 17);
        assert_eq!(data.padded_heightmap.width(), 19);
        assert_eq!(data.biome_map.width(), 17);
        assert_eq!(data.bump_map.width(), 17);
        assert_eq!(data.heightmap.spacing(), 32.0);
    }

    #[test]
    fn test_neighbours_share_edges() {
        let config = small_config();
        let b = builder(&config);
        let left = b.build(ChunkCoord::new(-1, 4), 0.0).unwrap();
        let right = b.build(ChunkCoord::new(0, 4), 0.0).unwrap();
        let below = b.build(ChunkCoord::new(0, 5), 0.0).unwrap();
        for i in 0..17 {
            assert_eq!(left.heightmap.get(16, i), right.heightmap.get(0, i));
            assert_eq!(right.heightmap.get(i, 16), below.heightmap.get(i, 0));
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = small_config();
        let b = builder(&config);
        let a = b.build(ChunkCoord::new(7, -3), 0.0).unwrap();
        let c = b.build(ChunkCoord::new(7, -3), 0.0).unwrap();
        assert_eq!(a.heightmap, c.heightmap);
        assert_eq!(a.biome_map, c.biome_map);
        assert_eq!(a.bump_map, c.bump_map);
    }

    #[test]
    fn test_reclassify_follows_sea_level() {
        let config = small_config();
        let b = builder(&config);
        let mut data = b.build(ChunkCoord::new(0, 0), 0.0).unwrap();
        // Procedural terrain sits far below the datum
        assert_eq!(data.biome_map.count(Biome::Grass), 0);

        b.reclassify(&mut data, -20_000.0);
        assert_eq!(data.sea_level_meters, -20_000.0);
        assert!(data.biome_map.biomes().iter().all(|b| !b.is_water()));
    }
}
